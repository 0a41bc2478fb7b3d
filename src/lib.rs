// Export all modules for public use
pub mod config;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod utils;

// Re-export the most commonly used items for convenience
pub use crate::config::{ServerConfig, ConfigError};
pub use crate::protocol::{ClientEvent, ServerEvent};
pub use crate::server::{EventDispatcher, ServerError, StatsSnapshot, VpnSimServer};
pub use crate::storage::LogStore;
