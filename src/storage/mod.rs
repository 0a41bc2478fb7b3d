// src/storage/mod.rs
//! Durable storage for connection and message logs.
//!
//! A single SQLite database backs the logging sink and the log queries
//! used by the dashboard.

pub mod log_store;
pub mod migrations;

pub use log_store::{ConnectionFilter, ConnectionRecord, LogStore, MessageFilter, MessageRecord, QueryResult};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;
