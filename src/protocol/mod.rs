// src/protocol/mod.rs
//! Protocol module for the simulated VPN server.
//!
//! This module defines the events exchanged with clients over the
//! WebSocket channel and their JSON encoding.

pub mod types;
pub mod serialization;

// Re-export commonly used items
pub use types::{ClientEvent, MessageError, ServerEvent};
