// src/protocol/serialization.rs
//! Protocol event serialization and deserialization.
//!
//! This module converts between protocol events and WebSocket frames
//! with size checks and error reporting.

use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

use crate::config::constants::MAX_FRAME_SIZE;
use crate::protocol::types::{ClientEvent, MessageError, ServerEvent};

/// Serialize a server event to a JSON string
pub fn serialize_event(event: &ServerEvent) -> Result<String, MessageError> {
    let json = serde_json::to_string(event)?;

    trace!("Serialized {} event, size: {} bytes", event_type_name(event), json.len());

    Ok(json)
}

/// Serialize a server event to a WebSocket message
pub fn event_to_ws_message(event: &ServerEvent) -> Result<WsMessage, MessageError> {
    let json = serialize_event(event)?;
    Ok(WsMessage::Text(json))
}

/// Deserialize a JSON string to a client event
pub fn deserialize_event(json: &str) -> Result<ClientEvent, MessageError> {
    if json.len() > MAX_FRAME_SIZE {
        return Err(MessageError::MessageTooLarge);
    }

    let event: ClientEvent = serde_json::from_str(json)?;

    trace!("Deserialized client event, size: {} bytes", json.len());

    Ok(event)
}

/// Parse a WebSocket message to a client event
pub fn ws_message_to_event(message: &WsMessage) -> Result<ClientEvent, MessageError> {
    match message {
        WsMessage::Text(text) => deserialize_event(text),
        WsMessage::Binary(_) => {
            Err(MessageError::InvalidFormat("Binary messages not supported".into()))
        }
        _ => Err(MessageError::InvalidFormat("Unsupported message type".into())),
    }
}

/// Create a standard error event
pub fn create_error_event(code: u16, message: &str) -> ServerEvent {
    ServerEvent::Error {
        code,
        message: message.to_string(),
    }
}

/// Get the name of an event type for logging
pub fn event_type_name(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::ConnectionStatus { .. } => "connection_status",
        ServerEvent::ReceiveMessage { .. } => "receive_message",
        ServerEvent::ServerStatsUpdate { .. } => "server_stats_update",
        ServerEvent::Error { .. } => "error",
    }
}

/// Log event information
pub fn log_event_info(event: &ServerEvent, session_id: &str) {
    match event {
        ServerEvent::ConnectionStatus { status, ip, .. } => {
            debug!("Sending connection_status to {}: {} ({})", session_id, status, ip);
        }
        ServerEvent::ReceiveMessage { message, .. } => {
            trace!("Sending reply to {}: {} chars", session_id, message.chars().count());
        }
        ServerEvent::ServerStatsUpdate { active_clients, total_messages } => {
            trace!(
                "Sending stats to {}: active={}, total={}",
                session_id, active_clients, total_messages
            );
        }
        ServerEvent::Error { code, message } => {
            warn!("Sending error to {}, code: {}, message: {}", session_id, code, message);
        }
    }
}
