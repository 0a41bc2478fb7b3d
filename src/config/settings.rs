// src/config/settings.rs
//! Server configuration settings.
//!
//! This module contains the command line surface and the server
//! configuration structure, with loading, parsing, and validation of
//! user-provided settings.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::config::constants::MAX_SIMULATED_DELAY_MS;
use crate::config::defaults;

/// Error type for configuration-related operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid delay range: {0}")]
    InvalidDelayRange(String),

    #[error("Invalid socket address: {0}")]
    InvalidSocketAddr(#[from] std::net::AddrParseError),
}

/// Inclusive range of simulated delay, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.min_ms > self.max_ms {
            return Err(ConfigError::InvalidDelayRange(format!(
                "{}: minimum {}ms exceeds maximum {}ms", name, self.min_ms, self.max_ms
            )));
        }
        if self.max_ms > MAX_SIMULATED_DELAY_MS {
            return Err(ConfigError::InvalidDelayRange(format!(
                "{}: maximum {}ms exceeds limit of {}ms", name, self.max_ms, MAX_SIMULATED_DELAY_MS
            )));
        }
        Ok(())
    }
}

impl From<(u64, u64)> for DelayRange {
    fn from((min_ms, max_ms): (u64, u64)) -> Self {
        Self::new(min_ms, max_ms)
    }
}

impl fmt::Display for DelayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.min_ms, self.max_ms)
    }
}

/// Parses `MIN..MAX` or `MIN-MAX`
impl FromStr for DelayRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once("..")
            .or_else(|| s.split_once('-'))
            .ok_or_else(|| ConfigError::InvalidDelayRange(format!("expected MIN..MAX, got '{}'", s)))?;

        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidDelayRange(format!("'{}': {}", part.trim(), e)))
        };

        Ok(Self::new(parse(min)?, parse(max)?))
    }
}

/// Log queries against the durable log store
#[derive(Subcommand, Debug, Clone)]
pub enum LogsCommand {
    /// List connection records, newest first
    Connections {
        /// Only records whose connection day matches (YYYY-MM-DD)
        #[clap(long)]
        date: Option<String>,
        /// Only records whose address contains this text
        #[clap(long)]
        ip: Option<String>,
        /// Only records of this client id
        #[clap(long)]
        client_id: Option<String>,
        /// Only records in this status (connected, disconnected)
        #[clap(long)]
        status: Option<String>,
    },
    /// List message records, newest first
    Messages {
        /// Only records logged on this day (YYYY-MM-DD)
        #[clap(long)]
        date: Option<String>,
        /// Only records whose address contains this text
        #[clap(long)]
        ip: Option<String>,
        /// Only records whose message contains this text
        #[clap(long)]
        content: Option<String>,
        /// Only records of this client id
        #[clap(long)]
        client_id: Option<String>,
        /// Only records in this direction (outgoing, incoming)
        #[clap(long)]
        direction: Option<String>,
    },
}

/// Subcommands; running without one starts the server
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Query the connection and message logs
    Logs {
        #[clap(subcommand)]
        query: LogsCommand,
    },
}

/// Command line arguments for the server
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "vpn-sim",
    about = "Simulated multi-client VPN server with durable traffic logs",
    version,
    author
)]
pub struct ServerArgs {
    /// Server address to listen on
    #[clap(long, default_value = defaults::DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// SQLite database for connection and message logs
    #[clap(long, default_value = defaults::DEFAULT_DATABASE_PATH)]
    pub database: String,

    /// Log level
    #[clap(long, default_value = defaults::DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Also write logs to this file (rotated daily)
    #[clap(long)]
    pub log_file: Option<String>,

    /// Configuration file path (JSON)
    #[clap(long)]
    pub config_file: Option<String>,

    /// Disable the simulated send and processing delays
    #[clap(long)]
    pub no_latency: bool,

    /// Outbound send delay range in milliseconds, e.g. 50..200
    #[clap(long)]
    pub send_delay_ms: Option<DelayRange>,

    /// Server-side processing delay range in milliseconds, e.g. 100..500
    #[clap(long)]
    pub process_delay_ms: Option<DelayRange>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    pub listen_addr: SocketAddr,

    /// SQLite database path
    pub database_path: PathBuf,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Whether simulated delays are applied
    #[serde(default = "default_true")]
    pub simulate_latency: bool,

    /// Outbound send delay
    #[serde(default = "default_send_delay")]
    pub send_delay: DelayRange,

    /// Server-side processing delay
    #[serde(default = "default_process_delay")]
    pub process_delay: DelayRange,

    /// Stats broadcast channel capacity
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_send_delay() -> DelayRange {
    defaults::DEFAULT_SEND_DELAY_MS.into()
}

fn default_process_delay() -> DelayRange {
    defaults::DEFAULT_PROCESS_DELAY_MS.into()
}

fn default_broadcast_capacity() -> usize {
    defaults::DEFAULT_BROADCAST_CAPACITY
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5001)),
            database_path: PathBuf::from(defaults::DEFAULT_DATABASE_PATH),
            log_level: default_log_level(),
            log_file: None,
            simulate_latency: true,
            send_delay: default_send_delay(),
            process_delay: default_process_delay(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration from command line arguments
    pub fn from_args(args: &ServerArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => {
                info!("Loading configuration from {}", path);
                Self::load_from_file(path)?
            }
            None => ServerConfig::default(),
        };

        // Explicit command line values override the file
        if args.config_file.is_none() || args.listen != defaults::DEFAULT_LISTEN_ADDRESS {
            config.listen_addr = args.listen.parse()?;
        }
        if args.config_file.is_none() || args.database != defaults::DEFAULT_DATABASE_PATH {
            config.database_path = PathBuf::from(&args.database);
        }
        if args.config_file.is_none() || args.log_level != defaults::DEFAULT_LOG_LEVEL {
            config.log_level = args.log_level.clone();
        }
        if let Some(log_file) = &args.log_file {
            config.log_file = Some(PathBuf::from(log_file));
        }
        if args.no_latency {
            config.simulate_latency = false;
        }
        if let Some(range) = args.send_delay_ms {
            config.send_delay = range;
        }
        if let Some(range) = args.process_delay_ms {
            config.process_delay = range;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("Database path must not be empty".to_string()));
        }

        self.send_delay.validate("send delay")?;
        self.process_delay.validate("processing delay")?;

        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Broadcast capacity must be at least 1".to_string()
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}
