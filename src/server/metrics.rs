// src/server/metrics.rs
//! Aggregate server statistics.
//!
//! Process-wide counters for active sessions and exchanged messages,
//! read as consistent snapshots.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};

use crate::utils::format_uptime;

/// Point-in-time read of the aggregate counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Number of live sessions
    pub active_clients: usize,
    /// Messages exchanged since startup, both directions
    pub total_messages: u64,
    /// Time since the server started
    #[serde(rename = "uptime_seconds", serialize_with = "serialize_secs")]
    pub uptime: Duration,
}

fn serialize_secs<S: Serializer>(uptime: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(uptime.as_secs_f64())
}

#[derive(Debug, Default)]
struct Counters {
    active_clients: usize,
    total_messages: u64,
}

/// Stats aggregator shared by all session handlers
#[derive(Debug)]
pub struct StatsAggregator {
    counters: RwLock<Counters>,
    start_time: Instant,
    started_at: DateTime<Local>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            start_time: Instant::now(),
            started_at: Local::now(),
        }
    }

    /// Wall-clock time the aggregator was created
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Record a new session
    pub fn on_connect(&self) {
        self.counters.write().active_clients += 1;
    }

    /// Record a closed session
    pub fn on_disconnect(&self) {
        let mut counters = self.counters.write();
        counters.active_clients = counters.active_clients.saturating_sub(1);
    }

    /// Record one processed message and its reply
    pub fn on_message_exchange(&self) {
        self.counters.write().total_messages += 2;
    }

    /// Both counters are read under one lock
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.read();
        StatsSnapshot {
            active_clients: counters.active_clients,
            total_messages: counters.total_messages,
            uptime: self.start_time.elapsed(),
        }
    }

    /// Get a compact status line for the periodic status log
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            "Active: {} clients | Messages: {} | Uptime: {}",
            snapshot.active_clients,
            snapshot.total_messages,
            format_uptime(snapshot.uptime)
        )
    }
}
