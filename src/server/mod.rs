// src/server/mod.rs
//! Server module for the simulated VPN service.
//!
//! Session registry, command responder, stats aggregation and the event
//! dispatcher that ties them together, plus the WebSocket transport.

pub mod client;
pub mod core;
pub mod dispatcher;
pub mod latency;
pub mod metrics;
pub mod responder;
pub mod session;
pub mod sink;

// Re-export commonly used items
pub use self::core::{ServerError, ServerState, VpnSimServer};
pub use client::{handle_client, serve_connection};
pub use dispatcher::{EventDispatcher, Reply};
pub use latency::{LatencyModel, LatencyPhase, NoLatency, RandomLatency};
pub use metrics::{StatsAggregator, StatsSnapshot};
pub use responder::ResponseEngine;
pub use session::{RegistryError, Session, SessionRegistry};
pub use sink::{BroadcastPublisher, Direction, LogSink, SinkError, StatsPublisher};
