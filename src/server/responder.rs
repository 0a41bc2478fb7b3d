// src/server/responder.rs
//! Command responder.
//!
//! Maps an incoming text command to the server's reply. Rules are
//! case-insensitive substring matches evaluated in order; the first
//! match wins, so "ping and status" is a ping.

use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::debug;

use crate::server::latency::{LatencyModel, LatencyPhase};
use crate::server::session::SessionRegistry;

/// Reply listing the supported commands
pub const HELP_REPLY: &str = "Available commands: ping, status, help, disconnect";

/// Advisory reply to a disconnect request; the session stays open
pub const DISCONNECT_REPLY: &str = "Preparing to disconnect. Please confirm by closing the connection.";

/// Recognised commands, in match priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Status,
    Help,
    Disconnect,
    Other,
}

impl Command {
    const RULES: [(&'static str, Command); 4] = [
        ("ping", Command::Ping),
        ("status", Command::Status),
        ("help", Command::Help),
        ("disconnect", Command::Disconnect),
    ];

    /// Classify a message by the first keyword it contains
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        Self::RULES
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map_or(Command::Other, |(_, command)| *command)
    }
}

/// Build the reply for `message`. Never fails, including for empty input.
pub fn respond(message: &str, active_clients: usize, now: DateTime<Local>) -> String {
    match Command::classify(message) {
        Command::Ping => format!("PONG! Server received your ping at {}", now.format("%H:%M:%S")),
        Command::Status => format!("VPN Server Status: ONLINE | Active Clients: {}", active_clients),
        Command::Help => HELP_REPLY.to_string(),
        Command::Disconnect => DISCONNECT_REPLY.to_string(),
        Command::Other => format!(
            "Message received and encrypted. Length: {} characters.",
            message.chars().count()
        ),
    }
}

/// Response engine: simulated processing delay followed by `respond`
pub struct ResponseEngine {
    registry: Arc<SessionRegistry>,
    latency: Arc<dyn LatencyModel>,
}

impl ResponseEngine {
    pub fn new(registry: Arc<SessionRegistry>, latency: Arc<dyn LatencyModel>) -> Self {
        Self { registry, latency }
    }

    /// Compute the reply to `message` from `session_id`
    pub async fn process(&self, session_id: &str, message: &str) -> String {
        self.latency.pause(LatencyPhase::Processing).await;

        // Active count is read after the delay, as the reply is built
        let reply = respond(message, self.registry.count(), Local::now());
        debug!("Processed message from {} as {:?}", session_id, Command::classify(message));
        reply
    }
}
