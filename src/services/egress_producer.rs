//! Egress Producer (§4.5) — the only place outbound side effects leave the
//! process. Wraps a [`BusClient`] with schema encoding, a bounded exponential
//! retry around each publish attempt, and the producer's circuit breaker.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use tracing::{error, warn};

use crate::domain::error::BusError;
use crate::domain::models::{BusConfig, PhaseTransitionPayload};
use crate::domain::ports::EgressProducer;
use crate::infrastructure::bus::{BusClient, Headers, JsonSchemaCodec, SchemaCodec};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// JSON schema id used while the schema registry is disabled — a fixed
/// sentinel rather than a real registry-assigned id (§6 JSON-interop path).
const JSON_SCHEMA_ID: u32 = 0;

pub struct BusEgressProducer {
    client: Arc<dyn BusClient>,
    codec: JsonSchemaCodec,
    breaker: Arc<CircuitBreaker>,
    max_retry_time: StdDuration,
    initial_retry_time: StdDuration,
    retries: u32,
}

impl BusEgressProducer {
    pub fn new(client: Arc<dyn BusClient>, config: &BusConfig) -> Arc<Self> {
        Arc::new(Self {
            client,
            codec: JsonSchemaCodec,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::producer()),
            max_retry_time: StdDuration::from_millis(config.max_retry_time_ms),
            initial_retry_time: StdDuration::from_millis(config.initial_retry_time_ms),
            retries: config.retries,
        })
    }

    async fn publish_framed(&self, topic: &str, frame: Vec<u8>) -> Result<(), BusError> {
        let client = Arc::clone(&self.client);
        let backoff_policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_retry_time)
            .with_max_interval(self.max_retry_time)
            .with_max_elapsed_time(Some(self.max_retry_time))
            .build();

        let attempts_left = Arc::new(std::sync::atomic::AtomicU32::new(self.retries));
        let topic_owned = topic.to_string();
        // Fresh per logical `Produce` call, not per retry attempt, so a
        // retried publish is still traceable as one outbound message (§4.5).
        let headers: Headers = vec![
            ("correlation-id".to_string(), uuid::Uuid::new_v4().to_string()),
            ("timestamp".to_string(), chrono::Utc::now().timestamp_millis().to_string()),
        ];

        let result = self
            .breaker
            .call(
                || {
                    let client = Arc::clone(&client);
                    let topic = topic_owned.clone();
                    let frame = frame.clone();
                    let headers = headers.clone();
                    let attempts_left = Arc::clone(&attempts_left);
                    async move {
                        retry(backoff_policy, || {
                            let client = Arc::clone(&client);
                            let topic = topic.clone();
                            let frame = frame.clone();
                            let headers = headers.clone();
                            let attempts_left = Arc::clone(&attempts_left);
                            async move {
                                if attempts_left.load(std::sync::atomic::Ordering::SeqCst) == 0 {
                                    return Err(backoff::Error::permanent(BusError::ProducerError {
                                        topic: topic.clone(),
                                        reason: "retry budget exhausted".to_string(),
                                    }));
                                }
                                match client.send(&topic, headers, frame).await {
                                    Ok(()) => Ok(()),
                                    Err(err) => {
                                        attempts_left.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                                        warn!(topic = %topic, error = %err, "publish attempt failed, retrying");
                                        Err(backoff::Error::transient(err))
                                    }
                                }
                            }
                        })
                        .await
                    }
                },
                |_| true,
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(topic, error = %err, "egress publish failed after retries");
                Err(BusError::ProducerError { topic: topic.to_string(), reason: err.to_string() })
            }
        }
    }
}

#[async_trait]
impl EgressProducer for BusEgressProducer {
    async fn produce(&self, topic: &str, payload: &PhaseTransitionPayload) -> Result<(), BusError> {
        let body = self.codec.encode(payload)?;
        let frame = crate::infrastructure::bus::codec::frame(JSON_SCHEMA_ID, &body)?;
        self.publish_framed(topic, frame).await
    }

    async fn produce_batch(&self, topic: &str, payloads: &[PhaseTransitionPayload]) -> Result<(), BusError> {
        for payload in payloads {
            self.produce(topic, payload).await?;
        }
        Ok(())
    }

    async fn send_to_dlq(&self, original_topic: &str, original_bytes: &[u8], error: &str) -> Result<(), BusError> {
        use base64::Engine;
        let dlq_topic = format!("{original_topic}.dlq");
        let envelope = serde_json::json!({
            "originalTopic": original_topic,
            "payload": base64::engine::general_purpose::STANDARD.encode(original_bytes),
            "error": error,
        });
        let body = serde_json::to_vec(&envelope).map_err(|e| BusError::SchemaRegistryError(e.to_string()))?;
        let frame = crate::infrastructure::bus::codec::frame(JSON_SCHEMA_ID, &body)?;
        self.publish_framed(&dlq_topic, frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TransitionState;
    use crate::infrastructure::bus::MockBusClient;

    fn payload() -> PhaseTransitionPayload {
        PhaseTransitionPayload {
            project_id: 1,
            phase_id: 10,
            phase_type_name: "Review".to_string(),
            state: TransitionState::End,
            operator: "system".to_string(),
            project_status: "ACTIVE".to_string(),
            date: None,
        }
    }

    #[tokio::test]
    async fn produce_succeeds_against_mock_client() {
        let client = MockBusClient::new();
        let producer = BusEgressProducer::new(client.clone(), &BusConfig::default());

        producer.produce("phase.transition", &payload()).await.unwrap();

        let sent = client.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "phase.transition");
    }

    #[tokio::test]
    async fn produce_carries_correlation_id_and_timestamp_headers() {
        let client = MockBusClient::new();
        let producer = BusEgressProducer::new(client.clone(), &BusConfig::default());

        producer.produce("phase.transition", &payload()).await.unwrap();

        let headers = client.sent_headers().await;
        assert_eq!(headers.len(), 1);
        let keys: Vec<&str> = headers[0].iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"correlation-id"));
        assert!(keys.contains(&"timestamp"));
    }

    #[tokio::test]
    async fn send_to_dlq_uses_dlq_suffixed_topic() {
        let client = MockBusClient::new();
        let producer = BusEgressProducer::new(client.clone(), &BusConfig::default());

        producer.send_to_dlq("challenge.update", b"garbage", "decode error").await.unwrap();

        let sent = client.sent().await;
        assert_eq!(sent[0].0, "challenge.update.dlq");
    }

    #[tokio::test]
    async fn produce_batch_publishes_each_payload() {
        let client = MockBusClient::new();
        let producer = BusEgressProducer::new(client.clone(), &BusConfig::default());

        producer.produce_batch("phase.transition", &[payload(), payload()]).await.unwrap();

        assert_eq!(client.sent().await.len(), 2);
    }
}
