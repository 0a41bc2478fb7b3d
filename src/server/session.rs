// src/server/session.rs
//! Session registry for connected clients.
//!
//! A `Session` is one live logical connection. The registry owns the
//! id -> session map; sessions are cheap to clone and share their
//! message history.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// One message received from a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub content: String,
    pub timestamp: DateTime<Local>,
}

/// Exclusive access to a session's history. Holding it is what
/// serializes the handling of one session's messages.
pub type HistoryGuard = OwnedMutexGuard<Vec<HistoryEntry>>;

/// Client session for a connected participant
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub source_address: String,
    pub connected_at: DateTime<Local>,
    history: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl Session {
    fn new(id: String, source_address: String) -> Self {
        Self {
            id,
            source_address,
            connected_at: Local::now(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wait for this session's turn and take its history
    pub async fn lock_history(&self) -> HistoryGuard {
        self.history.clone().lock_owned().await
    }

    /// Snapshot of the received messages, oldest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.clone()
    }

    /// Whether both handles refer to the same registration, as opposed to
    /// a later reconnection that reused the id.
    pub fn same_registration(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.history, &other.history)
    }
}

/// Registry error type
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session already registered: {0}")]
    DuplicateSession(String),
}

struct Entry {
    seq: u64,
    session: Session,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    next_seq: u64,
}

/// Registry of live sessions keyed by id
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. Fails if the id is already live.
    pub fn create(&self, id: &str, source_address: &str) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();
        if inner.sessions.contains_key(id) {
            return Err(RegistryError::DuplicateSession(id.to_string()));
        }

        let session = Session::new(id.to_string(), source_address.to_string());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.sessions.insert(id.to_string(), Entry { seq, session: session.clone() });

        debug!("Registered session {} from {}", id, source_address);
        Ok(session)
    }

    /// Remove a session; absent ids are a no-op
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.inner.write().sessions.remove(id).map(|entry| entry.session)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().sessions.get(id).map(|entry| entry.session.clone())
    }

    pub fn count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// True if `session` is still the live registration for its id
    pub fn is_current(&self, session: &Session) -> bool {
        self.inner
            .read()
            .sessions
            .get(&session.id)
            .map_or(false, |entry| entry.session.same_registration(session))
    }

    /// All live sessions in registration order
    pub fn all_sessions(&self) -> Vec<Session> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.sessions.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.session.clone()).collect()
    }
}
