// src/server/core.rs
//! Core server implementation for the simulated VPN service.
//!
//! Owns the listener, the shared dispatcher and the background tasks,
//! and drives the server through its lifecycle states.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use crate::config::constants::{SHUTDOWN_GRACE_PERIOD, STATUS_REPORT_INTERVAL, STORAGE_TIMESTAMP_FORMAT};
use crate::config::{ConfigError, ServerConfig};
use crate::protocol::MessageError;
use crate::server::client::handle_client;
use crate::server::dispatcher::EventDispatcher;
use crate::server::latency;
use crate::server::metrics::StatsAggregator;
use crate::server::session::RegistryError;
use crate::server::sink::{BroadcastPublisher, StatsPublisher};
use crate::storage::{LogStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] MessageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session error: {0}")]
    Session(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Initial state
    Created,
    /// Server is starting up
    Starting,
    /// Server is running
    Running,
    /// Server is shutting down
    ShuttingDown,
    /// Server has stopped
    Stopped,
}

/// Simulated VPN server
pub struct VpnSimServer {
    /// Server configuration
    pub config: ServerConfig,
    dispatcher: Arc<EventDispatcher>,
    publisher: Arc<BroadcastPublisher>,
    log_store: LogStore,
    state: Arc<RwLock<ServerState>>,
    shutdown: watch::Sender<bool>,
    /// Background tasks, aborted on shutdown
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl VpnSimServer {
    /// Create a server, opening the log database named in `config`
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let log_store = LogStore::open(&config.database_path)?;
        Ok(Self::with_log_store(config, log_store))
    }

    /// Create a server that logs to an already opened store
    pub fn with_log_store(config: ServerConfig, log_store: LogStore) -> Self {
        info!("Initializing simulated VPN server");
        if !config.simulate_latency {
            info!("Latency simulation disabled");
        }

        let publisher = Arc::new(BroadcastPublisher::new(config.broadcast_capacity));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(log_store.clone()),
            publisher.clone() as Arc<dyn StatsPublisher>,
            latency::from_config(&config),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            dispatcher,
            publisher,
            log_store,
            state: Arc::new(RwLock::new(ServerState::Created)),
            shutdown,
            task_handles: Arc::new(Mutex::new(Vec::new())),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    /// Bind the listener and start accepting connections. Returns the
    /// handle of the accept loop.
    pub async fn start(&self) -> Result<JoinHandle<()>, ServerError> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Created && *state != ServerState::Stopped {
                return Err(ServerError::Internal(format!("Cannot start server in state {:?}", *state)));
            }
            *state = ServerState::Starting;
        }
        self.shutdown.send_replace(false);

        let listener = match TcpListener::bind(self.config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind to {}: {}", self.config.listen_addr, e);
                *self.state.write().await = ServerState::Stopped;
                return Err(ServerError::Io(e));
            }
        };
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);

        info!("Server listening on ws://{}", local_addr);
        *self.state.write().await = ServerState::Running;

        self.start_background_tasks().await;

        let dispatcher = self.dispatcher.clone();
        let publisher = self.publisher.clone();
        let mut shutdown = self.shutdown.subscribe();

        let accept_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Accept loop stopping for shutdown");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            trace!("Accepted connection from {}", addr);
                            let dispatcher = dispatcher.clone();
                            let publisher = publisher.clone();
                            let session_shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, addr, dispatcher, publisher, session_shutdown).await {
                                    log_client_error(&addr, &e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            // Avoid busy-looping on accept errors
                            time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
            info!("Server listener task stopped");
        });

        Ok(accept_handle)
    }

    /// Shut down gracefully: close every session, then stop background tasks
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        {
            let mut state = self.state.write().await;
            match *state {
                ServerState::ShuttingDown | ServerState::Stopped => {
                    info!("Server already shutting down or stopped");
                    return Ok(());
                }
                ServerState::Created => {
                    *state = ServerState::Stopped;
                    return Ok(());
                }
                current => {
                    info!("Shutting down server (current state: {:?})", current);
                    *state = ServerState::ShuttingDown;
                }
            }
        }

        self.shutdown.send_replace(true);

        let registry = self.dispatcher.registry().clone();
        let drained = time::timeout(SHUTDOWN_GRACE_PERIOD, async {
            while registry.count() > 0 {
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("{} sessions still open after grace period", registry.count());
            for session in registry.all_sessions() {
                debug!("Abandoning session {} from {}", session.id, session.source_address);
            }
        }

        {
            let mut handles = self.task_handles.lock().await;
            debug!("Aborting {} background tasks", handles.len());
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        let stats = self.dispatcher.stats();
        info!(
            "Final status: {} | Started: {}",
            stats.report(),
            stats.started_at().format(STORAGE_TIMESTAMP_FORMAT)
        );
        *self.state.write().await = ServerState::Stopped;
        info!("Server shutdown complete");
        Ok(())
    }

    async fn start_background_tasks(&self) {
        let stats = self.dispatcher.stats().clone();
        let mut shutdown = self.shutdown.subscribe();

        let report_handle = tokio::spawn(async move {
            report_status(stats, &mut shutdown).await;
        });

        self.task_handles.lock().await.push(report_handle);
    }

    pub async fn get_state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    pub fn publisher(&self) -> Arc<BroadcastPublisher> {
        self.publisher.clone()
    }

    pub fn log_store(&self) -> &LogStore {
        &self.log_store
    }
}

/// Write the status line every `STATUS_REPORT_INTERVAL` until shutdown
async fn report_status(stats: Arc<StatsAggregator>, shutdown: &mut watch::Receiver<bool>) {
    let mut interval = time::interval(STATUS_REPORT_INTERVAL);
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => info!("Status: {}", stats.report()),
            _ = shutdown.changed() => break,
        }
    }
}

fn log_client_error(addr: &SocketAddr, e: &ServerError) {
    use tokio_tungstenite::tungstenite::error::Error as WsError;

    match e {
        ServerError::WebSocket(WsError::ConnectionClosed | WsError::Protocol(_) | WsError::Io(_)) => {
            trace!("WebSocket connection closed for {}: {}", addr, e);
        }
        ServerError::WebSocket(_) => debug!("WebSocket error for {}: {}", addr, e),
        _ => error!("Error handling client {}: {}", addr, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ConnectionFilter, MessageFilter};
    use futures::{SinkExt, Stream, StreamExt};
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

    fn test_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            database_path: dir.join("vpn_logs.db"),
            simulate_latency: false,
            ..ServerConfig::default()
        }
    }

    async fn next_of_kind<S>(ws: &mut S, kind: &str) -> Value
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        loop {
            let frame = time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = frame {
                let event: Value = serde_json::from_str(&text).unwrap();
                if event["event"] == kind {
                    return event;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_server_lifecycle_over_tcp() {
        let dir = tempdir().unwrap();
        let server = VpnSimServer::new(test_config(dir.path())).unwrap();
        assert_eq!(server.get_state().await, ServerState::Created);

        let accept = server.start().await.unwrap();
        assert_eq!(server.get_state().await, ServerState::Running);
        let addr = server.local_addr().unwrap();

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let status = next_of_kind(&mut ws, "connection_status").await;
        assert_eq!(status["ip"], "127.0.0.1");

        ws.send(WsMessage::Text(json!({"event": "send_message", "message": "status"}).to_string()))
            .await
            .unwrap();
        let reply = next_of_kind(&mut ws, "receive_message").await;
        assert_eq!(reply["message"], "VPN Server Status: ONLINE | Active Clients: 1");

        server.shutdown().await.unwrap();
        assert_eq!(server.get_state().await, ServerState::Stopped);
        time::timeout(Duration::from_secs(5), accept).await.unwrap().unwrap();

        assert_eq!(server.dispatcher().registry().count(), 0);
        let connections = server.log_store().connection_logs(&ConnectionFilter::default()).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].status, "disconnected");
        let messages = server.log_store().message_logs(&MessageFilter::default()).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dir = tempdir().unwrap();
        let server = VpnSimServer::new(test_config(dir.path())).unwrap();
        server.start().await.unwrap();

        assert!(matches!(server.start().await, Err(ServerError::Internal(_))));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = tempdir().unwrap();
        let server = VpnSimServer::new(test_config(dir.path())).unwrap();

        // Never started
        server.shutdown().await.unwrap();
        assert_eq!(server.get_state().await, ServerState::Stopped);

        server.start().await.unwrap();
        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        assert_eq!(server.get_state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let dir = tempdir().unwrap();
        let server = VpnSimServer::new(test_config(dir.path())).unwrap();
        server.start().await.unwrap();
        server.shutdown().await.unwrap();

        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        next_of_kind(&mut ws, "connection_status").await;
        server.shutdown().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.broadcast_capacity = 0;
        assert!(matches!(VpnSimServer::new(config), Err(ServerError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_report_stops_on_shutdown() {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move { report_status(stats, &mut rx).await });

        time::sleep(STATUS_REPORT_INTERVAL * 3).await;
        assert!(!task.is_finished());

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
