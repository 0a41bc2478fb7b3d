// src/server/client.rs
//! Client connection handling.
//!
//! One task per WebSocket connection. Frames are read continuously and
//! queued to a per-connection worker, so a disconnect is seen even while
//! a message is still being processed. A full queue rejects the frame
//! instead of blocking the reader.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use crate::config::constants::{error_code, REPLY_TIMESTAMP_FORMAT, SESSION_QUEUE_CAPACITY};
use crate::config::defaults::DEFAULT_SOURCE_ADDRESS;
use crate::protocol::serialization::{create_error_event, event_to_ws_message, log_event_info, ws_message_to_event};
use crate::protocol::{ClientEvent, MessageError, ServerEvent};
use crate::server::core::ServerError;
use crate::server::dispatcher::EventDispatcher;
use crate::server::metrics::StatsSnapshot;
use crate::server::sink::BroadcastPublisher;
use crate::utils::generate_session_id;

type WsSender<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, WsMessage>>>;

/// Address recorded for a peer. Unspecified addresses get the placeholder.
pub fn source_address(addr: &SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        DEFAULT_SOURCE_ADDRESS.to_string()
    } else {
        addr.ip().to_string()
    }
}

/// Wire error code for a frame that could not be parsed
fn frame_error_code(e: &MessageError) -> u16 {
    match e {
        MessageError::MessageTooLarge => error_code::MESSAGE_TOO_LARGE,
        MessageError::InvalidFormat(_) => error_code::UNSUPPORTED_FRAME,
        _ => error_code::INVALID_MESSAGE,
    }
}

/// Handle an accepted TCP connection
pub async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<EventDispatcher>,
    publisher: Arc<BroadcastPublisher>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    if let Err(e) = stream.set_nodelay(true) {
        trace!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    let session_id = generate_session_id();
    serve_connection(stream, session_id, source_address(&addr), dispatcher, publisher, shutdown).await
}

/// Upgrade `stream` to WebSocket and run session `session_id` until the
/// peer goes away or shutdown is signalled.
pub async fn serve_connection<S>(
    stream: S,
    session_id: String,
    address: String,
    dispatcher: Arc<EventDispatcher>,
    publisher: Arc<BroadcastPublisher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    debug!("WebSocket connection established with {}", address);

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let sender: WsSender<S> = Arc::new(Mutex::new(ws_sender));

    // Subscribe first so the connect broadcast reaches this session too
    let stats_rx = publisher.subscribe();
    trace!("Session {} subscribed to stats ({} observers)", session_id, publisher.observer_count());

    if let Err(e) = dispatcher.connect(&session_id, &address).await {
        let error = create_error_event(error_code::DUPLICATE_SESSION, &e.to_string());
        if let Err(send_error) = send_event(&sender, &error, &session_id).await {
            debug!("Failed to report rejected session {}: {}", session_id, send_error);
        }
        return Err(ServerError::Session(e));
    }

    if let Err(e) = send_event(&sender, &ServerEvent::connected(&session_id, &address), &session_id).await {
        dispatcher.disconnect(&session_id).await;
        return Err(e);
    }

    let forwarder = tokio::spawn(forward_stats(stats_rx, sender.clone(), session_id.clone()));

    let (queue, inbox) = mpsc::channel(SESSION_QUEUE_CAPACITY);
    let worker = tokio::spawn(process_messages(
        inbox,
        sender.clone(),
        dispatcher.clone(),
        session_id.clone(),
    ));

    let result = loop {
        if *shutdown.borrow() {
            debug!("Closing session {} for server shutdown", session_id);
            break Ok(());
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(frame @ (WsMessage::Text(_) | WsMessage::Binary(_)))) => {
                    let error = match ws_message_to_event(&frame) {
                        Ok(ClientEvent::SendMessage { message: Some(message) }) => match queue.try_send(message) {
                            Ok(()) => None,
                            Err(TrySendError::Full(_)) => {
                                debug!("Session {} queue full, rejecting message", session_id);
                                Some(create_error_event(error_code::SESSION_BUSY, "Too many messages in flight"))
                            }
                            Err(TrySendError::Closed(_)) => break Ok(()),
                        },
                        Ok(ClientEvent::SendMessage { message: None }) => Some(create_error_event(
                            error_code::INVALID_MESSAGE,
                            &MessageError::MissingField("message".into()).to_string(),
                        )),
                        Err(e) => {
                            debug!("Failed to parse message from {}: {}", session_id, e);
                            Some(create_error_event(frame_error_code(&e), &e.to_string()))
                        }
                    };
                    if let Some(error) = error {
                        if let Err(e) = send_event(&sender, &error, &session_id).await {
                            break Err(e);
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("Client {} closed the connection: {:?}", session_id, frame);
                    break Ok(());
                }
                // Ping replies are queued by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed))
                | Some(Err(WsError::AlreadyClosed))
                | Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                    trace!("Client {} went away without a close frame", session_id);
                    break Ok(());
                }
                Some(Err(e)) => {
                    debug!("WebSocket error for client {}: {}", session_id, e);
                    break Err(ServerError::from(e));
                }
                None => {
                    debug!("WebSocket connection closed for client {}", session_id);
                    break Ok(());
                }
            }
        }
    };

    // Disconnect before the worker drains so an in-flight reply is suppressed
    dispatcher.disconnect(&session_id).await;
    drop(queue);
    forwarder.abort();
    if let Err(e) = worker.await {
        warn!("Message worker for {} failed: {}", session_id, e);
    }

    let _ = sender.lock().await.close().await;
    info!("Session {} from {} ended", session_id, address);

    result
}

/// Handle queued messages one at a time, in arrival order
async fn process_messages<S>(
    mut inbox: mpsc::Receiver<String>,
    sender: WsSender<S>,
    dispatcher: Arc<EventDispatcher>,
    session_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        let reply = match dispatcher.message(&session_id, &message).await {
            Some(reply) => reply,
            None => continue,
        };

        let event = ServerEvent::ReceiveMessage {
            message: reply.message,
            timestamp: reply.timestamp.format(REPLY_TIMESTAMP_FORMAT).to_string(),
        };
        if let Err(e) = send_event(&sender, &event, &session_id).await {
            debug!("Failed to send reply to {}: {}", session_id, e);
            break;
        }
    }
}

/// Relay broadcast stats snapshots to this session
async fn forward_stats<S>(
    mut stats_rx: broadcast::Receiver<StatsSnapshot>,
    sender: WsSender<S>,
    session_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match stats_rx.recv().await {
            Ok(snapshot) => {
                if send_event(&sender, &ServerEvent::from(&snapshot), &session_id).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("Session {} skipped {} stats updates", session_id, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn send_event<S>(sender: &WsSender<S>, event: &ServerEvent, session_id: &str) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    log_event_info(event, session_id);
    let message = event_to_ws_message(event)?;
    sender.lock().await.send(message).await?;
    Ok(())
}
