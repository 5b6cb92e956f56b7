//! Transport-level bus client (§6). The full Kafka/Confluent broker
//! protocol is explicitly out of scope (§1: "the event-bus client library"
//! is an external collaborator) — `RealBusClient` only needs to honor the
//! wire shape spec.md §6 specifies (length-prefixed binary payloads) over a
//! bare TCP connection to the first configured broker, and report
//! connectivity accurately for the startup probe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, WriteBytesExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::error::BusError;

/// Budget for the startup connectivity probe (§6: "500 ms budget").
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// A single outbound message header, e.g. `correlation-id` or `timestamp`
/// (§4.5: "each outbound message carries headers ... fresh per call").
pub type Headers = Vec<(String, String)>;

/// Sends a pre-framed (magic byte + schema id + body) payload to a topic,
/// carrying the caller's headers alongside it.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn send(&self, topic: &str, headers: Headers, frame: Vec<u8>) -> Result<(), BusError>;

    /// Whether this client is the mock fallback (drives health reporting).
    fn is_mock(&self) -> bool;
}

/// Attempts a TCP connection to the first broker in `brokers` within
/// [`PROBE_TIMEOUT`]. Returns `true` on a successful connect.
pub async fn probe_connectivity(brokers: &[&str]) -> bool {
    let Some(first) = brokers.first() else {
        return false;
    };
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(first)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            warn!(broker = *first, error = %err, "bus connectivity probe failed to connect");
            false
        }
        Err(_elapsed) => {
            warn!(broker = *first, "bus connectivity probe timed out");
            false
        }
    }
}

/// Live client: opens a fresh TCP connection per send and writes
/// `[u32 BE total_len][u16 BE topic_len][topic bytes][frame bytes]`.
pub struct RealBusClient {
    broker: String,
    client_id: String,
    stream: Mutex<Option<TcpStream>>,
}

impl RealBusClient {
    pub fn new(broker: impl Into<String>, client_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { broker: broker.into(), client_id: client_id.into(), stream: Mutex::new(None) })
    }

    async fn connection(&self) -> Result<TcpStream, BusError> {
        TcpStream::connect(&self.broker)
            .await
            .map_err(|e| BusError::ProducerError { topic: String::new(), reason: format!("connect to {}: {e}", self.broker) })
    }
}

#[async_trait]
impl BusClient for RealBusClient {
    async fn send(&self, topic: &str, headers: Headers, frame: Vec<u8>) -> Result<(), BusError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connection().await?);
        }
        let stream = guard.as_mut().expect("populated above");

        let topic_bytes = topic.as_bytes();
        let mut message = Vec::with_capacity(6 + topic_bytes.len() + frame.len());
        message
            .write_u16::<BigEndian>(topic_bytes.len() as u16)
            .map_err(|e| BusError::ProducerError { topic: topic.to_string(), reason: e.to_string() })?;
        message.extend_from_slice(topic_bytes);

        message
            .write_u16::<BigEndian>(headers.len() as u16)
            .map_err(|e| BusError::ProducerError { topic: topic.to_string(), reason: e.to_string() })?;
        for (key, value) in &headers {
            let key_bytes = key.as_bytes();
            let value_bytes = value.as_bytes();
            message
                .write_u16::<BigEndian>(key_bytes.len() as u16)
                .map_err(|e| BusError::ProducerError { topic: topic.to_string(), reason: e.to_string() })?;
            message.extend_from_slice(key_bytes);
            message
                .write_u16::<BigEndian>(value_bytes.len() as u16)
                .map_err(|e| BusError::ProducerError { topic: topic.to_string(), reason: e.to_string() })?;
            message.extend_from_slice(value_bytes);
        }

        message.extend_from_slice(&frame);

        let total_len = message.len() as u32;
        let mut out = Vec::with_capacity(4 + message.len());
        out.write_u32::<BigEndian>(total_len)
            .map_err(|e| BusError::ProducerError { topic: topic.to_string(), reason: e.to_string() })?;
        out.extend_from_slice(&message);

        if let Err(err) = stream.write_all(&out).await {
            *guard = None;
            return Err(BusError::ProducerError { topic: topic.to_string(), reason: err.to_string() });
        }
        Ok(())
    }

    fn is_mock(&self) -> bool {
        false
    }
}

/// Mock client: logs intent and always succeeds. Selected when the
/// connectivity probe fails outside production, or when `BUS_MOCK_MODE=true`.
#[derive(Default)]
pub struct MockBusClient {
    log: Mutex<Vec<(String, usize)>>,
    headers_log: Mutex<Vec<Headers>>,
}

impl MockBusClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages recorded so far, for test assertions.
    pub async fn sent(&self) -> Vec<(String, usize)> {
        self.log.lock().await.clone()
    }

    /// Headers recorded per send, in the same order as [`Self::sent`].
    pub async fn sent_headers(&self) -> Vec<Headers> {
        self.headers_log.lock().await.clone()
    }
}

#[async_trait]
impl BusClient for MockBusClient {
    async fn send(&self, topic: &str, headers: Headers, frame: Vec<u8>) -> Result<(), BusError> {
        info!(topic, bytes = frame.len(), "mock bus client: publish (no-op)");
        self.log.lock().await.push((topic.to_string(), frame.len()));
        self.headers_log.lock().await.push(headers);
        Ok(())
    }

    fn is_mock(&self) -> bool {
        true
    }
}
