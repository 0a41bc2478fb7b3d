// src/server/latency.rs
//! Simulated network and processing delay.
//!
//! The dispatcher pauses through a `LatencyModel` so that delays can be
//! disabled or controlled outside of production.

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::config::{DelayRange, ServerConfig};

/// Where in an exchange a delay is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyPhase {
    /// Delivering a reply back to the client
    Send,
    /// Server-side handling of a command
    Processing,
}

/// Source of simulated delays
#[async_trait]
pub trait LatencyModel: Send + Sync {
    /// Sleep for the phase's delay. Always runs to completion.
    async fn pause(&self, phase: LatencyPhase);
}

/// No delay at all
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLatency;

#[async_trait]
impl LatencyModel for NoLatency {
    async fn pause(&self, _phase: LatencyPhase) {}
}

/// Uniformly random delay per phase
#[derive(Debug, Clone, Copy)]
pub struct RandomLatency {
    send: DelayRange,
    processing: DelayRange,
}

impl RandomLatency {
    pub fn new(send: DelayRange, processing: DelayRange) -> Self {
        Self { send, processing }
    }

    /// Draw a delay for the given phase
    pub fn sample(&self, phase: LatencyPhase) -> Duration {
        let range = match phase {
            LatencyPhase::Send => self.send,
            LatencyPhase::Processing => self.processing,
        };
        Duration::from_millis(thread_rng().gen_range(range.min_ms..=range.max_ms))
    }
}

#[async_trait]
impl LatencyModel for RandomLatency {
    async fn pause(&self, phase: LatencyPhase) {
        let delay = self.sample(phase);
        trace!("Simulating {:?} latency of {:?}", phase, delay);
        tokio::time::sleep(delay).await;
    }
}

/// Build the latency model described by the configuration
pub fn from_config(config: &ServerConfig) -> Arc<dyn LatencyModel> {
    if config.simulate_latency {
        Arc::new(RandomLatency::new(config.send_delay, config.process_delay))
    } else {
        Arc::new(NoLatency)
    }
}
