// src/storage/migrations.rs
//! Schema creation and version management.

use rusqlite::Connection;
use tracing::info;

use super::{StorageError, StorageResult};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, SCHEMA_VERSION
        )));
    }

    if current < 1 {
        let tx = conn.transaction()?;
        migrate_v1(&tx)?;
        tx.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
        tx.commit()?;
        info!("Applied log store schema v1");
    }

    Ok(())
}

/// v1: connection and message logs
fn migrate_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS connection_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            connection_time TEXT NOT NULL,
            disconnection_time TEXT NULL,
            status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            message TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            direction TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_connection_logs_client ON connection_logs(client_id, status);
        CREATE INDEX IF NOT EXISTS idx_message_logs_timestamp ON message_logs(timestamp);
        ",
    )?;
    Ok(())
}
