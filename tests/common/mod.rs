//! Shared fixtures for the scheduler's integration tests: a recording
//! [`EgressProducer`] double used across scenario and property tests so each
//! test file isn't reinventing the same stub.

use std::sync::Arc;

use async_trait::async_trait;
use autopilot_scheduler::domain::error::BusError;
use autopilot_scheduler::domain::models::PhaseTransitionPayload;
use autopilot_scheduler::domain::ports::EgressProducer;
use tokio::sync::Mutex;

/// Records every payload passed to [`EgressProducer::produce`], in order.
/// Always succeeds — the circuit breaker and retry paths belong to the
/// producer's own unit tests, not these end-to-end scenarios.
#[derive(Default)]
pub struct RecordingProducer {
    produced: Mutex<Vec<(String, PhaseTransitionPayload)>>,
}

impl RecordingProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(topic, payload)` pairs recorded so far, in call order.
    pub async fn produced(&self) -> Vec<(String, PhaseTransitionPayload)> {
        self.produced.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.produced.lock().await.len()
    }
}

#[async_trait]
impl EgressProducer for RecordingProducer {
    async fn produce(&self, topic: &str, payload: &PhaseTransitionPayload) -> Result<(), BusError> {
        self.produced.lock().await.push((topic.to_string(), payload.clone()));
        Ok(())
    }

    async fn produce_batch(&self, topic: &str, payloads: &[PhaseTransitionPayload]) -> Result<(), BusError> {
        for payload in payloads {
            self.produce(topic, payload).await?;
        }
        Ok(())
    }

    async fn send_to_dlq(&self, _original_topic: &str, _original_bytes: &[u8], _error: &str) -> Result<(), BusError> {
        Ok(())
    }
}

/// Poll `predicate` every 20 ms until it's true or `timeout_ms` elapses.
/// Used to wait on the timer engine's background task without sleeping a
/// fixed, flaky duration.
#[allow(dead_code)]
pub async fn wait_for<F: FnMut() -> bool>(mut predicate: F, timeout_ms: u64) -> bool {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}
