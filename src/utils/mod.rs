// src/utils/mod.rs
//! Utility functions and helpers.
//!
//! This module contains general-purpose utilities used across
//! the application.

pub mod logging;

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::time::Duration;

use crate::config::constants::{SESSION_ID_LENGTH, SESSION_ID_PREFIX};

/// Generate a random alphanumeric string of specified length
pub fn random_string(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a fresh session id, e.g. `client_x8Kq...`
pub fn generate_session_id() -> String {
    format!("{}{}", SESSION_ID_PREFIX, random_string(SESSION_ID_LENGTH))
}

/// Format an uptime as `<h>h <m>m <s>s` with total hours
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s1 = random_string(10);
        let s2 = random_string(10);

        assert_eq!(s1.len(), 10);
        assert_eq!(s2.len(), 10);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_generate_session_id() {
        let id = generate_session_id();
        assert!(id.starts_with(SESSION_ID_PREFIX));
        assert_eq!(id.len(), SESSION_ID_PREFIX.len() + SESSION_ID_LENGTH);
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0h 0m 0s");
        assert_eq!(format_uptime(Duration::from_secs(3725)), "1h 2m 5s");
        // Hours keep counting past a day
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "25h 1m 1s");
    }
}
