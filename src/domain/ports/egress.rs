//! Egress producer port — the only place a side effect leaves the process.
//!
//! The Job Registry, Adjustment Engine, and Recovery Orchestrator all depend
//! on this trait rather than on a concrete bus client, so every outbound
//! publish is mediated through whatever the circuit breaker is wrapping.

use async_trait::async_trait;

use crate::domain::error::BusError;
use crate::domain::models::PhaseTransitionPayload;

/// Publishes phase-transition payloads (and dead-letters) onto the bus.
#[async_trait]
pub trait EgressProducer: Send + Sync {
    /// Publish a single payload to `topic`.
    async fn produce(&self, topic: &str, payload: &PhaseTransitionPayload) -> Result<(), BusError>;

    /// Publish a batch of payloads to `topic`.
    async fn produce_batch(&self, topic: &str, payloads: &[PhaseTransitionPayload]) -> Result<(), BusError>;

    /// Archive an unprocessable message to `<originalTopic>.dlq`.
    async fn send_to_dlq(&self, original_topic: &str, original_bytes: &[u8], error: &str) -> Result<(), BusError>;
}
