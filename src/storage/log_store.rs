// src/storage/log_store.rs
//! SQLite log store.
//!
//! Records session lifecycle and message traffic, and answers the
//! filtered queries of the log dashboard. Implements `LogSink`; sink
//! calls run on tokio's blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::migrations::run_migrations;
use super::{StorageError, StorageResult};
use crate::config::constants::STORAGE_TIMESTAMP_FORMAT;
use crate::config::settings::LogsCommand;
use crate::server::sink::{Direction, LogSink, SinkError};

pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_DISCONNECTED: &str = "disconnected";

/// One row of `connection_logs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRecord {
    pub id: i64,
    pub client_id: String,
    pub ip_address: String,
    pub connection_time: String,
    pub disconnection_time: Option<String>,
    pub status: String,
}

/// One row of `message_logs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub client_id: String,
    pub ip_address: String,
    pub message: String,
    pub timestamp: String,
    pub direction: String,
}

/// Connection log query. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter {
    /// Exact client id
    pub client_id: Option<String>,
    /// Substring of the address
    pub ip: Option<String>,
    /// Day of connection, `YYYY-MM-DD`
    pub date: Option<String>,
    /// Exact status
    pub status: Option<String>,
}

/// Message log query. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Exact client id
    pub client_id: Option<String>,
    /// Substring of the address
    pub ip: Option<String>,
    /// Day the message was logged, `YYYY-MM-DD`
    pub date: Option<String>,
    /// Substring of the message text
    pub content: Option<String>,
    /// Exact direction
    pub direction: Option<Direction>,
}

/// Rows returned by a command-line log query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Connections(Vec<ConnectionRecord>),
    Messages(Vec<MessageRecord>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Connections(rows) => rows.len(),
            QueryResult::Messages(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accumulates `AND`-joined conditions with positional parameters
#[derive(Default)]
struct WhereClause {
    conditions: Vec<&'static str>,
    params: Vec<String>,
}

impl WhereClause {
    fn push(&mut self, condition: &'static str, value: String) {
        self.conditions.push(condition);
        self.params.push(value);
    }

    fn exact(&mut self, condition: &'static str, value: &Option<String>) {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            self.push(condition, value.to_string());
        }
    }

    fn like(&mut self, condition: &'static str, value: &Option<String>) {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            self.push(condition, format!("%{}%", value));
        }
    }

    fn build(&self, base: &str, order_by: &str) -> String {
        let mut sql = base.to_string();
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
        sql
    }
}

fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(STORAGE_TIMESTAMP_FORMAT).to_string()
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    Ok(ConnectionRecord {
        id: row.get("id")?,
        client_id: row.get("client_id")?,
        ip_address: row.get("ip_address")?,
        connection_time: row.get("connection_time")?,
        disconnection_time: row.get("disconnection_time")?,
        status: row.get("status")?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get("id")?,
        client_id: row.get("client_id")?,
        ip_address: row.get("ip_address")?,
        message: row.get("message")?,
        timestamp: row.get("timestamp")?,
        direction: row.get("direction")?,
    })
}

/// Thread-safe handle to the log database
#[derive(Clone)]
pub struct LogStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl LogStore {
    /// Open or create the database and apply migrations
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&path, flags)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        let store = Self::from_connection(conn, path)?;
        info!("Opened log store at {:?}", store.path);
        Ok(store)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn from_connection(mut conn: Connection, path: PathBuf) -> StorageResult<Self> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a `connected` row
    pub fn record_connection(&self, client_id: &str, ip_address: &str, at: DateTime<Local>) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO connection_logs (client_id, ip_address, connection_time, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![client_id, ip_address, format_timestamp(at), STATUS_CONNECTED],
        )?;
        Ok(())
    }

    /// Close the client's open connection rows; returns how many changed
    pub fn record_disconnection(&self, client_id: &str, at: DateTime<Local>) -> StorageResult<usize> {
        let updated = self.conn.lock().execute(
            "UPDATE connection_logs SET disconnection_time = ?1, status = ?2
             WHERE client_id = ?3 AND status = ?4",
            params![format_timestamp(at), STATUS_DISCONNECTED, client_id, STATUS_CONNECTED],
        )?;
        if updated == 0 {
            debug!("No open connection row for {}", client_id);
        }
        Ok(updated)
    }

    /// Insert one message row
    pub fn record_message(
        &self,
        client_id: &str,
        ip_address: &str,
        message: &str,
        direction: Direction,
        at: DateTime<Local>,
    ) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO message_logs (client_id, ip_address, message, timestamp, direction)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![client_id, ip_address, message, format_timestamp(at), direction.as_str()],
        )?;
        Ok(())
    }

    /// Connection rows matching `filter`, newest first
    pub fn connection_logs(&self, filter: &ConnectionFilter) -> StorageResult<Vec<ConnectionRecord>> {
        let mut clause = WhereClause::default();
        clause.exact("client_id = ?", &filter.client_id);
        clause.like("ip_address LIKE ?", &filter.ip);
        clause.exact("date(connection_time) = ?", &filter.date);
        clause.exact("status = ?", &filter.status);

        let sql = clause.build("SELECT * FROM connection_logs", "connection_time DESC, id DESC");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(clause.params.iter()), connection_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Message rows matching `filter`, newest first
    pub fn message_logs(&self, filter: &MessageFilter) -> StorageResult<Vec<MessageRecord>> {
        let mut clause = WhereClause::default();
        clause.exact("client_id = ?", &filter.client_id);
        clause.like("ip_address LIKE ?", &filter.ip);
        clause.exact("date(timestamp) = ?", &filter.date);
        clause.like("message LIKE ?", &filter.content);
        if let Some(direction) = filter.direction {
            clause.push("direction = ?", direction.as_str().to_string());
        }

        let sql = clause.build("SELECT * FROM message_logs", "timestamp DESC, id DESC");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(clause.params.iter()), message_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Run a log query as given on the command line
    pub fn run_query(&self, query: &LogsCommand) -> StorageResult<QueryResult> {
        match query {
            LogsCommand::Connections { date, ip, client_id, status } => {
                let filter = ConnectionFilter {
                    client_id: client_id.clone(),
                    ip: ip.clone(),
                    date: date.clone(),
                    status: status.clone(),
                };
                Ok(QueryResult::Connections(self.connection_logs(&filter)?))
            }
            LogsCommand::Messages { date, ip, content, client_id, direction } => {
                let direction = direction
                    .as_deref()
                    .map(str::parse::<Direction>)
                    .transpose()
                    .map_err(|e| StorageError::InvalidFilter(e.to_string()))?;
                let filter = MessageFilter {
                    client_id: client_id.clone(),
                    ip: ip.clone(),
                    date: date.clone(),
                    content: content.clone(),
                    direction,
                };
                Ok(QueryResult::Messages(self.message_logs(&filter)?))
            }
        }
    }

    /// Run a store operation on the blocking pool
    async fn run_blocking<F>(&self, op: F) -> Result<(), SinkError>
    where
        F: FnOnce(&LogStore) -> StorageResult<()> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?
            .map_err(|e: StorageError| SinkError::Storage(e.to_string()))
    }
}

#[async_trait]
impl LogSink for LogStore {
    async fn log_connection(&self, session_id: &str, address: &str) -> Result<(), SinkError> {
        let (id, address) = (session_id.to_string(), address.to_string());
        self.run_blocking(move |store| store.record_connection(&id, &address, Local::now()))
            .await
    }

    async fn log_disconnection(&self, session_id: &str, _address: &str) -> Result<(), SinkError> {
        let id = session_id.to_string();
        self.run_blocking(move |store| store.record_disconnection(&id, Local::now()).map(|_| ()))
            .await
    }

    async fn log_message(
        &self,
        session_id: &str,
        address: &str,
        text: &str,
        direction: Direction,
    ) -> Result<(), SinkError> {
        let (id, address, text) = (session_id.to_string(), address.to_string(), text.to_string());
        self.run_blocking(move |store| store.record_message(&id, &address, &text, direction, Local::now()))
            .await
    }
}
