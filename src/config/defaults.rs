// src/config/defaults.rs
//! Default configurations for the simulated VPN server.
//!
//! This module provides the values used when a setting is not
//! explicitly specified on the command line or in a config file.

/// Default server listening address
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:5001";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default SQLite database holding connection and message logs
pub const DEFAULT_DATABASE_PATH: &str = "database/vpn_logs.db";

/// Default placeholder address when the peer address is unknown
pub const DEFAULT_SOURCE_ADDRESS: &str = "127.0.0.1";

/// Default outbound send delay range (milliseconds)
pub const DEFAULT_SEND_DELAY_MS: (u64, u64) = (50, 200);

/// Default server-side processing delay range (milliseconds)
pub const DEFAULT_PROCESS_DELAY_MS: (u64, u64) = (100, 500);

/// Default capacity of the stats broadcast channel
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;
