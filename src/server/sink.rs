// src/server/sink.rs
//! Collaborators the dispatcher reports to.
//!
//! `LogSink` durably records connections and traffic; `StatsPublisher`
//! fans aggregate stats out to every observer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::trace;

use crate::server::metrics::StatsSnapshot;

/// Direction of a logged message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to server
    Outgoing,
    /// Server to client
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            other => Err(SinkError::InvalidDirection(other.to_string())),
        }
    }
}

/// Sink error type
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),
}

/// Durable record of session lifecycle and traffic
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log_connection(&self, session_id: &str, address: &str) -> Result<(), SinkError>;

    async fn log_disconnection(&self, session_id: &str, address: &str) -> Result<(), SinkError>;

    async fn log_message(
        &self,
        session_id: &str,
        address: &str,
        text: &str,
        direction: Direction,
    ) -> Result<(), SinkError>;
}

/// Fire-and-forget delivery of stats to all observers
#[cfg_attr(test, mockall::automock)]
pub trait StatsPublisher: Send + Sync {
    fn publish_stats(&self, snapshot: &StatsSnapshot);
}

/// Stats publisher backed by a tokio broadcast channel. Each connected
/// session holds a receiver.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<StatsSnapshot>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatsSnapshot> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl StatsPublisher for BroadcastPublisher {
    fn publish_stats(&self, snapshot: &StatsSnapshot) {
        // No observers is not an error
        match self.sender.send(snapshot.clone()) {
            Ok(delivered) => trace!("Published stats to {} observers", delivered),
            Err(_) => trace!("Published stats with no observers"),
        }
    }
}
