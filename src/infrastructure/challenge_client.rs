//! HTTP adapter for the challenge-catalog port (§6): `GET /phases/active`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as ReqwestClient;
use serde::Deserialize;

use crate::domain::error::RecoveryError;
use crate::domain::models::{CatalogPhase, Metadata, TransitionState};
use crate::domain::ports::ChallengeClient;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

/// Wire shape of one entry in the `GET /phases/active` response. The
/// challenge service speaks camelCase JSON; `CatalogPhase` is our own
/// snake_case domain type, so the two are kept separate rather than
/// bending the domain model to an external contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCatalogPhase {
    project_id: u64,
    phase_id: u64,
    phase_type_name: String,
    state: TransitionState,
    end_time: DateTime<Utc>,
    project_status: String,
    operator: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl From<RawCatalogPhase> for CatalogPhase {
    fn from(raw: RawCatalogPhase) -> Self {
        Self {
            project_id: raw.project_id,
            phase_id: raw.phase_id,
            phase_type_name: raw.phase_type_name,
            state: raw.state,
            end_time: raw.end_time,
            project_status: raw.project_status,
            operator: raw.operator,
            metadata: raw.metadata,
        }
    }
}

/// HTTP client for the challenge service, protected by its own circuit
/// breaker (§4.6) independent from the bus producer's.
pub struct HttpChallengeClient {
    http_client: ReqwestClient,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpChallengeClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build challenge-service HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::challenge_service()),
        })
    }

    async fn fetch(&self) -> Result<Vec<CatalogPhase>, String> {
        let url = format!("{}/phases/active", self.base_url.trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("challenge service returned {status}"));
        }

        let raw: Vec<RawCatalogPhase> = response
            .json()
            .await
            .map_err(|e| format!("failed to decode challenge service response: {e}"))?;

        Ok(raw.into_iter().map(CatalogPhase::from).collect())
    }
}

#[async_trait]
impl ChallengeClient for HttpChallengeClient {
    async fn fetch_active_phases(&self) -> Result<Vec<CatalogPhase>, RecoveryError> {
        let breaker = Arc::clone(&self.breaker);
        let result = breaker.call(|| self.fetch(), |_| true).await;

        match result {
            Ok(phases) => Ok(phases),
            Err(CircuitBreakerError::Open { retry_after }) => Err(RecoveryError::CatalogFetchFailed(format!(
                "circuit open, retry after {retry_after}"
            ))),
            Err(CircuitBreakerError::Timeout) => {
                Err(RecoveryError::CatalogFetchFailed("challenge service request timed out".to_string()))
            }
            Err(CircuitBreakerError::OperationFailed(reason)) => Err(RecoveryError::CatalogFetchFailed(reason)),
        }
    }
}

/// In-memory stand-in for tests and local development without a running
/// challenge service.
pub struct MockChallengeClient {
    phases: Vec<CatalogPhase>,
}

impl MockChallengeClient {
    pub fn new(phases: Vec<CatalogPhase>) -> Self {
        Self { phases }
    }
}

#[async_trait]
impl ChallengeClient for MockChallengeClient {
    async fn fetch_active_phases(&self) -> Result<Vec<CatalogPhase>, RecoveryError> {
        Ok(self.phases.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_returns_configured_phases() {
        let phase = CatalogPhase {
            project_id: 1,
            phase_id: 2,
            phase_type_name: "SUBMISSION".to_string(),
            state: TransitionState::End,
            end_time: Utc::now(),
            project_status: "ACTIVE".to_string(),
            operator: "system".to_string(),
            metadata: None,
        };
        let client = MockChallengeClient::new(vec![phase.clone()]);
        let phases = client.fetch_active_phases().await.unwrap();
        assert_eq!(phases, vec![phase]);
    }

    #[test]
    fn raw_catalog_phase_deserializes_camel_case_wire_shape() {
        let body = serde_json::json!({
            "projectId": 42,
            "phaseId": 7,
            "phaseTypeName": "REVIEW",
            "state": "END",
            "endTime": "2026-01-01T00:00:00Z",
            "projectStatus": "ACTIVE",
            "operator": "system"
        });
        let raw: RawCatalogPhase = serde_json::from_value(body).unwrap();
        let phase: CatalogPhase = raw.into();
        assert_eq!(phase.project_id, 42);
        assert_eq!(phase.phase_id, 7);
        assert_eq!(phase.phase_type_name, "REVIEW");
    }
}
