// src/server/dispatcher.rs
//! Event dispatcher.
//!
//! Entry point for the transport layer: `connect`, `message` and
//! `disconnect` drive the session registry, the response engine and the
//! stats aggregator, report to the log sink, and broadcast a fresh stats
//! snapshot after every successful event.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::server::latency::{LatencyModel, LatencyPhase};
use crate::server::metrics::{StatsAggregator, StatsSnapshot};
use crate::server::responder::ResponseEngine;
use crate::server::session::{HistoryEntry, RegistryError, Session, SessionRegistry};
use crate::server::sink::{Direction, LogSink, SinkError, StatsPublisher};

/// Reply to be delivered to the originating session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: String,
    pub timestamp: DateTime<Local>,
}

pub struct EventDispatcher {
    registry: Arc<SessionRegistry>,
    stats: Arc<StatsAggregator>,
    engine: ResponseEngine,
    latency: Arc<dyn LatencyModel>,
    log_sink: Arc<dyn LogSink>,
    publisher: Arc<dyn StatsPublisher>,
    /// Held while the registry and the active counter change together
    lifecycle: Mutex<()>,
}

impl EventDispatcher {
    pub fn new(
        log_sink: Arc<dyn LogSink>,
        publisher: Arc<dyn StatsPublisher>,
        latency: Arc<dyn LatencyModel>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            engine: ResponseEngine::new(registry.clone(), latency.clone()),
            registry,
            stats: Arc::new(StatsAggregator::new()),
            latency,
            log_sink,
            publisher,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a new session.
    ///
    /// A duplicate live id is rejected: the existing session is kept and
    /// nothing is counted, logged or broadcast.
    pub async fn connect(&self, session_id: &str, address: &str) -> Result<Session, RegistryError> {
        let session = {
            let _guard = self.lifecycle.lock();
            match self.registry.create(session_id, address) {
                Ok(session) => {
                    self.stats.on_connect();
                    session
                }
                Err(e) => {
                    warn!(session_id = %session_id, address = %address, "Rejected connect: {}", e);
                    return Err(e);
                }
            }
        };

        info!(session_id = %session_id, address = %address, "Client connected");

        self.report("connection", self.log_sink.log_connection(session_id, address).await);
        self.broadcast();

        Ok(session)
    }

    /// Handle one text message from a session.
    ///
    /// Returns `None` when the session is unknown (nothing happens at all)
    /// or when it disconnected while the message was being processed (the
    /// reply is suppressed and nothing is counted).
    pub async fn message(&self, session_id: &str, text: &str) -> Option<Reply> {
        let session = match self.registry.get(session_id) {
            Some(session) => session,
            None => {
                debug!(session_id = %session_id, "Dropping message for unknown session");
                return None;
            }
        };

        // One message per session at a time
        let mut history = session.lock_history().await;
        if !self.registry.is_current(&session) {
            debug!(session_id = %session_id, "Session closed while message was queued, dropping it");
            return None;
        }
        let address = session.source_address.as_str();

        self.report(
            "outgoing message",
            self.log_sink.log_message(session_id, address, text, Direction::Outgoing).await,
        );

        history.push(HistoryEntry { content: text.to_string(), timestamp: Local::now() });

        let response = self.engine.process(session_id, text).await;
        self.latency.pause(LatencyPhase::Send).await;

        if !self.registry.is_current(&session) {
            debug!(session_id = %session_id, "Session closed during processing, reply suppressed");
            return None;
        }

        self.report(
            "incoming message",
            self.log_sink.log_message(session_id, address, &response, Direction::Incoming).await,
        );

        self.stats.on_message_exchange();
        self.broadcast();
        drop(history);

        Some(Reply { message: response, timestamp: Local::now() })
    }

    /// Remove a session. Unknown ids are a no-op.
    pub async fn disconnect(&self, session_id: &str) -> Option<Session> {
        let session = {
            let _guard = self.lifecycle.lock();
            let session = self.registry.remove(session_id)?;
            self.stats.on_disconnect();
            session
        };

        info!(session_id = %session_id, address = %session.source_address, "Client disconnected");

        self.report(
            "disconnection",
            self.log_sink.log_disconnection(session_id, &session.source_address).await,
        );
        self.broadcast();

        Some(session)
    }

    fn broadcast(&self) {
        self.publisher.publish_stats(&self.stats.snapshot());
    }

    /// Sink failures never abort event processing
    fn report(&self, what: &str, outcome: Result<(), SinkError>) {
        if let Err(e) = outcome {
            warn!("Failed to log {}: {}", what, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::latency::NoLatency;
    use crate::server::sink::{BroadcastPublisher, MockStatsPublisher};
    use async_trait::async_trait;
    use quickcheck::quickcheck;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{broadcast, Notify};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum LogCall {
        Connection(String, String),
        Disconnection(String, String),
        Message(String, String, String, Direction),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: parking_lot::Mutex<Vec<LogCall>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<LogCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        async fn log_connection(&self, id: &str, address: &str) -> Result<(), SinkError> {
            self.calls.lock().push(LogCall::Connection(id.into(), address.into()));
            Ok(())
        }

        async fn log_disconnection(&self, id: &str, address: &str) -> Result<(), SinkError> {
            self.calls.lock().push(LogCall::Disconnection(id.into(), address.into()));
            Ok(())
        }

        async fn log_message(
            &self,
            id: &str,
            address: &str,
            text: &str,
            direction: Direction,
        ) -> Result<(), SinkError> {
            self.calls
                .lock()
                .push(LogCall::Message(id.into(), address.into(), text.into(), direction));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn log_connection(&self, _: &str, _: &str) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("database offline".into()))
        }

        async fn log_disconnection(&self, _: &str, _: &str) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("database offline".into()))
        }

        async fn log_message(&self, _: &str, _: &str, _: &str, _: Direction) -> Result<(), SinkError> {
            Err(SinkError::Storage("disk full".into()))
        }
    }

    /// Blocks processing until released
    #[derive(Default)]
    struct GatedLatency {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl LatencyModel for GatedLatency {
        async fn pause(&self, phase: LatencyPhase) {
            if phase == LatencyPhase::Processing {
                self.entered.notify_one();
                self.release.notified().await;
            }
        }
    }

    /// Tracks how many processing delays overlap
    #[derive(Default)]
    struct OverlapLatency {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl LatencyModel for OverlapLatency {
        async fn pause(&self, phase: LatencyPhase) {
            if phase == LatencyPhase::Processing {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    struct Harness {
        dispatcher: Arc<EventDispatcher>,
        sink: Arc<RecordingSink>,
        updates: broadcast::Receiver<StatsSnapshot>,
    }

    fn harness_with(latency: Arc<dyn LatencyModel>) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(BroadcastPublisher::new(64));
        let updates = publisher.subscribe();
        let dispatcher = Arc::new(EventDispatcher::new(sink.clone(), publisher, latency));
        Harness { dispatcher, sink, updates }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(NoLatency))
    }

    fn counts(snapshot: &StatsSnapshot) -> (usize, u64) {
        (snapshot.active_clients, snapshot.total_messages)
    }

    #[tokio::test]
    async fn test_connect_logs_and_broadcasts() {
        let mut h = harness();
        let session = h.dispatcher.connect("a", "10.0.0.1").await.unwrap();
        assert_eq!(session.id, "a");

        assert_eq!(h.sink.calls(), vec![LogCall::Connection("a".into(), "10.0.0.1".into())]);
        assert_eq!(counts(&h.updates.recv().await.unwrap()), (1, 0));
        assert_eq!(h.dispatcher.registry().count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_connect_is_rejected_quietly() {
        let mut h = harness();
        h.dispatcher.connect("a", "10.0.0.1").await.unwrap();
        h.updates.recv().await.unwrap();

        let err = h.dispatcher.connect("a", "10.0.0.9").await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSession(_)));

        assert_eq!(h.sink.calls().len(), 1);
        assert!(h.updates.try_recv().is_err());
        assert_eq!(h.dispatcher.snapshot().active_clients, 1);
        assert_eq!(h.dispatcher.registry().get("a").unwrap().source_address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_message_exchange() {
        let mut h = harness();
        h.dispatcher.connect("a", "10.0.0.1").await.unwrap();
        h.updates.recv().await.unwrap();

        let reply = h.dispatcher.message("a", "help").await.unwrap();
        assert_eq!(reply.message, "Available commands: ping, status, help, disconnect");

        assert_eq!(
            h.sink.calls()[1..],
            [
                LogCall::Message("a".into(), "10.0.0.1".into(), "help".into(), Direction::Outgoing),
                LogCall::Message("a".into(), "10.0.0.1".into(), reply.message.clone(), Direction::Incoming),
            ]
        );
        assert_eq!(counts(&h.updates.recv().await.unwrap()), (1, 2));

        let history = h.dispatcher.registry().get("a").unwrap().history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "help");
    }

    #[tokio::test]
    async fn test_status_counts_active_sessions() {
        let h = harness();
        h.dispatcher.connect("a", "x").await.unwrap();
        h.dispatcher.connect("b", "y").await.unwrap();

        let reply = h.dispatcher.message("b", "Status?").await.unwrap();
        assert_eq!(reply.message, "VPN Server Status: ONLINE | Active Clients: 2");
    }

    #[tokio::test]
    async fn test_message_for_unknown_session_is_dropped() {
        let mut h = harness();
        assert!(h.dispatcher.message("ghost", "ping").await.is_none());

        assert!(h.sink.calls().is_empty());
        assert!(h.updates.try_recv().is_err());
        assert_eq!(h.dispatcher.snapshot().total_messages, 0);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let mut h = harness();
        h.dispatcher.connect("a", "10.0.0.1").await.unwrap();
        h.updates.recv().await.unwrap();

        let removed = h.dispatcher.disconnect("a").await.unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(
            h.sink.calls().last().unwrap(),
            &LogCall::Disconnection("a".into(), "10.0.0.1".into())
        );
        assert_eq!(counts(&h.updates.recv().await.unwrap()), (0, 0));

        // Second disconnect is a silent no-op
        assert!(h.dispatcher.disconnect("a").await.is_none());
        assert_eq!(h.sink.calls().len(), 2);
        assert!(h.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_event_broadcasts_once() {
        let mut publisher = MockStatsPublisher::new();
        publisher.expect_publish_stats().times(3).return_const(());

        let dispatcher = EventDispatcher::new(
            Arc::new(RecordingSink::default()),
            Arc::new(publisher),
            Arc::new(NoLatency),
        );

        dispatcher.connect("a", "x").await.unwrap();
        dispatcher.message("a", "ping").await.unwrap();
        assert!(dispatcher.message("b", "ping").await.is_none());
        dispatcher.disconnect("a").await.unwrap();
        assert!(dispatcher.disconnect("b").await.is_none());
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_abort_processing() {
        let publisher = Arc::new(BroadcastPublisher::new(8));
        let mut updates = publisher.subscribe();
        let dispatcher = EventDispatcher::new(Arc::new(FailingSink), publisher, Arc::new(NoLatency));

        dispatcher.connect("a", "x").await.unwrap();
        let reply = dispatcher.message("a", "hello").await.unwrap();
        assert_eq!(reply.message, "Message received and encrypted. Length: 5 characters.");
        dispatcher.disconnect("a").await.unwrap();

        assert_eq!(counts(&updates.recv().await.unwrap()), (1, 0));
        assert_eq!(counts(&updates.recv().await.unwrap()), (1, 2));
        assert_eq!(counts(&updates.recv().await.unwrap()), (0, 2));
    }

    #[tokio::test]
    async fn test_disconnect_during_processing_suppresses_reply() {
        let gate = Arc::new(GatedLatency::default());
        let h = harness_with(gate.clone());
        h.dispatcher.connect("a", "x").await.unwrap();

        let dispatcher = h.dispatcher.clone();
        let pending = tokio::spawn(async move { dispatcher.message("a", "ping").await });

        gate.entered.notified().await;
        h.dispatcher.disconnect("a").await.unwrap();
        gate.release.notify_one();

        assert!(pending.await.unwrap().is_none());
        assert_eq!(h.dispatcher.snapshot().total_messages, 0);

        let incoming = h.sink.calls().into_iter().filter(|call| {
            matches!(call, LogCall::Message(_, _, _, Direction::Incoming))
        }).count();
        assert_eq!(incoming, 0);
    }

    #[tokio::test]
    async fn test_message_waiting_behind_disconnect_is_dropped() {
        let gate = Arc::new(GatedLatency::default());
        let h = harness_with(gate.clone());
        h.dispatcher.connect("a", "x").await.unwrap();

        let dispatcher = h.dispatcher.clone();
        let first = tokio::spawn(async move { dispatcher.message("a", "one").await });
        gate.entered.notified().await;

        // Second message waits on the first one's history lock
        let dispatcher = h.dispatcher.clone();
        let second = tokio::spawn(async move { dispatcher.message("a", "two").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.dispatcher.disconnect("a").await.unwrap();
        gate.release.notify_one();

        assert!(first.await.unwrap().is_none());
        assert!(second.await.unwrap().is_none());

        let outgoing: Vec<LogCall> = h
            .sink
            .calls()
            .into_iter()
            .filter(|call| matches!(call, LogCall::Message(..)))
            .collect();
        assert_eq!(
            outgoing,
            vec![LogCall::Message("a".into(), "x".into(), "one".into(), Direction::Outgoing)]
        );
        assert_eq!(h.dispatcher.snapshot().total_messages, 0);
    }

    #[tokio::test]
    async fn test_reconnect_during_processing_suppresses_stale_reply() {
        let gate = Arc::new(GatedLatency::default());
        let h = harness_with(gate.clone());
        h.dispatcher.connect("a", "x").await.unwrap();

        let dispatcher = h.dispatcher.clone();
        let pending = tokio::spawn(async move { dispatcher.message("a", "ping").await });

        gate.entered.notified().await;
        h.dispatcher.disconnect("a").await.unwrap();
        h.dispatcher.connect("a", "x").await.unwrap();
        gate.release.notify_one();

        assert!(pending.await.unwrap().is_none());
        assert_eq!(h.dispatcher.snapshot().active_clients, 1);
    }

    #[tokio::test]
    async fn test_messages_of_one_session_are_serialized() {
        let latency = Arc::new(OverlapLatency::default());
        let h = harness_with(latency.clone());
        h.dispatcher.connect("a", "x").await.unwrap();

        let (r1, r2, r3) = tokio::join!(
            h.dispatcher.message("a", "one"),
            h.dispatcher.message("a", "two"),
            h.dispatcher.message("a", "three"),
        );
        assert!(r1.is_some() && r2.is_some() && r3.is_some());
        assert_eq!(latency.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(h.dispatcher.snapshot().total_messages, 6);
    }

    #[tokio::test]
    async fn test_sessions_are_processed_concurrently() {
        let latency = Arc::new(OverlapLatency::default());
        let h = harness_with(latency.clone());
        h.dispatcher.connect("a", "x").await.unwrap();
        h.dispatcher.connect("b", "y").await.unwrap();

        let (r1, r2) = tokio::join!(
            h.dispatcher.message("a", "one"),
            h.dispatcher.message("b", "two"),
        );
        assert!(r1.is_some() && r2.is_some());
        assert_eq!(latency.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_n_connects_m_disconnects() {
        let h = harness();
        for i in 0..10 {
            h.dispatcher.connect(&format!("s{}", i), "x").await.unwrap();
        }
        for i in 0..4 {
            h.dispatcher.disconnect(&format!("s{}", i)).await.unwrap();
        }
        assert_eq!(h.dispatcher.snapshot().active_clients, 6);
        assert_eq!(h.dispatcher.registry().count(), 6);
    }

    quickcheck! {
        fn prop_active_count_tracks_registry(ops: Vec<(u8, u8)>) -> bool {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let h = harness();
                let mut live = HashSet::new();
                let mut exchanges = 0u64;

                for (op, id) in ops {
                    let id = format!("s{}", id % 16);
                    match op % 3 {
                        0 => {
                            if h.dispatcher.connect(&id, "x").await.is_ok() {
                                live.insert(id);
                            }
                        }
                        1 => {
                            h.dispatcher.disconnect(&id).await;
                            live.remove(&id);
                        }
                        _ => {
                            if h.dispatcher.message(&id, "status").await.is_some() {
                                exchanges += 1;
                            }
                        }
                    }

                    let snapshot = h.dispatcher.snapshot();
                    if snapshot.active_clients != h.dispatcher.registry().count()
                        || snapshot.active_clients != live.len()
                        || snapshot.total_messages != exchanges * 2
                    {
                        return false;
                    }
                }
                true
            })
        }
    }
}
