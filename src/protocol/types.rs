// src/protocol/types.rs
//! Protocol event types for client-server communication.
//!
//! Every frame is a JSON object carrying an `event` tag. Clients only
//! send text commands; the server answers the originating session and
//! broadcasts aggregate stats to everyone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::metrics::StatsSnapshot;

/// Error type for protocol message handling
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Message too large")]
    MessageTooLarge,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Events sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Text command for the server. A missing `message` field is
    /// tolerated on the wire and rejected by the handler.
    SendMessage {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once to a session right after it is registered
    ConnectionStatus {
        status: String,
        client_id: String,
        ip: String,
    },

    /// Reply to the originating session
    ReceiveMessage {
        message: String,
        timestamp: String,
    },

    /// Aggregate counters, broadcast to every session
    ServerStatsUpdate {
        active_clients: usize,
        total_messages: u64,
    },

    /// Error notification
    Error {
        code: u16,
        message: String,
    },
}

impl ServerEvent {
    pub fn connected(client_id: &str, ip: &str) -> Self {
        ServerEvent::ConnectionStatus {
            status: "connected".to_string(),
            client_id: client_id.to_string(),
            ip: ip.to_string(),
        }
    }
}

impl From<&StatsSnapshot> for ServerEvent {
    fn from(snapshot: &StatsSnapshot) -> Self {
        ServerEvent::ServerStatsUpdate {
            active_clients: snapshot.active_clients,
            total_messages: snapshot.total_messages,
        }
    }
}
