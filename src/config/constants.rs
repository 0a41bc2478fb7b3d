// src/config/constants.rs
//! Application constants and fixed settings.
//!
//! Limits and intervals that are not user-configurable.

use std::time::Duration;

/// Maximum size of a single inbound WebSocket text frame (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Upper bound accepted for any configured simulated delay
pub const MAX_SIMULATED_DELAY_MS: u64 = 10_000;

/// Interval of the periodic status line written to the log
pub const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// How long shutdown waits for open sessions to close
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Messages a session may have queued behind the one in flight
pub const SESSION_QUEUE_CAPACITY: usize = 64;

/// Length of the random part of generated session ids
pub const SESSION_ID_LENGTH: usize = 16;

/// Prefix of generated session ids
pub const SESSION_ID_PREFIX: &str = "client_";

/// Timestamp format attached to replies sent to clients
pub const REPLY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format used when persisting log rows
pub const STORAGE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Wire error codes
pub mod error_code {
    pub const INVALID_MESSAGE: u16 = 1002;
    pub const MESSAGE_TOO_LARGE: u16 = 1003;
    pub const UNSUPPORTED_FRAME: u16 = 1004;
    pub const SESSION_BUSY: u16 = 1005;
    pub const DUPLICATE_SESSION: u16 = 1006;
}
