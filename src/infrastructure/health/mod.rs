//! Health endpoint (§7): `GET /health` on `PORT`, bound only when a port is
//! configured. Reports 503 when the bus is down, the job-failure or
//! overdue-job ratios exceed their thresholds, or the last recovery run
//! failed outright.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::domain::models::JobStatus;
use crate::infrastructure::bus::BusClient;
use crate::services::job_registry::JobRegistry;
use crate::services::recovery_orchestrator::{RecoveryOrchestrator, RecoveryStatus};

/// Failure rate above which the process reports unhealthy (§7).
const FAILURE_RATE_THRESHOLD: f64 = 0.10;
/// Overdue-job ratio above which the process reports unhealthy (§7).
const OVERDUE_RATIO_THRESHOLD: f64 = 0.05;
/// Absolute failed-job count above which the process reports unhealthy (§7).
const ABSOLUTE_FAILED_THRESHOLD: u64 = 20;

#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<JobRegistry>,
    pub recovery: Arc<RecoveryOrchestrator>,
    pub bus_client: Arc<dyn BusClient>,
    pub bus_enabled: bool,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    bus_connected: bool,
    recovery_status: &'static str,
    total_jobs: usize,
    failed_jobs: u64,
    failure_rate: f64,
    overdue_jobs: u64,
    overdue_ratio: f64,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(handle_health)).with_state(state)
}

/// Binds and serves the health router until `shutdown` fires. No-op callers
/// should not invoke this when `PORT` is unset (see `main.rs`).
pub async fn serve(state: HealthState, port: u16, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

async fn handle_health(State(state): State<HealthState>) -> impl IntoResponse {
    let jobs = state.registry.list_all().await;
    let now = Utc::now();

    let total = jobs.len();
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count() as u64;
    let overdue = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Scheduled && j.scheduled_time <= now)
        .count() as u64;

    let failure_rate = if total == 0 { 0.0 } else { failed as f64 / total as f64 };
    let overdue_ratio = if total == 0 { 0.0 } else { overdue as f64 / total as f64 };

    let bus_connected = state.bus_enabled && !state.bus_client.is_mock();
    let bus_unhealthy = state.bus_enabled && state.bus_client.is_mock();

    let recovery_status = state.recovery.metrics().await.status;
    let recovery_unhealthy = recovery_status == RecoveryStatus::Failed;

    let healthy = !bus_unhealthy
        && !recovery_unhealthy
        && failure_rate <= FAILURE_RATE_THRESHOLD
        && overdue_ratio <= OVERDUE_RATIO_THRESHOLD
        && failed <= ABSOLUTE_FAILED_THRESHOLD;

    let body = HealthBody {
        status: if healthy { "ok" } else { "unhealthy" },
        bus_connected,
        recovery_status: recovery_status_str(recovery_status),
        total_jobs: total,
        failed_jobs: failed,
        failure_rate,
        overdue_jobs: overdue,
        overdue_ratio,
    };

    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

const fn recovery_status_str(status: RecoveryStatus) -> &'static str {
    match status {
        RecoveryStatus::NotStarted => "not_started",
        RecoveryStatus::InProgress => "in_progress",
        RecoveryStatus::Completed => "completed",
        RecoveryStatus::CompletedWithErrors => "completed_with_errors",
        RecoveryStatus::Failed => "failed",
        RecoveryStatus::Disabled => "disabled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ChallengeClient;
    use crate::domain::models::RecoveryConfig;
    use crate::infrastructure::bus::MockBusClient;
    use crate::services::egress_producer::BusEgressProducer;
    use crate::domain::models::{BusConfig, CatalogPhase};
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    struct EmptyChallengeClient;

    #[async_trait]
    impl ChallengeClient for EmptyChallengeClient {
        async fn fetch_active_phases(&self) -> Result<Vec<CatalogPhase>, crate::domain::error::RecoveryError> {
            Ok(vec![])
        }
    }

    async fn build_state() -> HealthState {
        let bus_client = MockBusClient::new();
        let producer = BusEgressProducer::new(bus_client.clone(), &BusConfig::default());
        let registry = JobRegistry::new(producer.clone(), Default::default());
        let recovery = RecoveryOrchestrator::new(Arc::new(EmptyChallengeClient), registry.clone(), producer, RecoveryConfig::default());
        HealthState { registry, recovery, bus_client, bus_enabled: true }
    }

    #[tokio::test]
    async fn reports_unhealthy_when_bus_is_mock_in_enabled_mode() {
        let state = build_state().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "unhealthy");
    }

    #[tokio::test]
    async fn reports_ok_when_bus_disabled_and_no_jobs() {
        let mut state = build_state().await;
        state.bus_enabled = false;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
