//! Recovery Orchestrator (§4.3) — on startup, reconciles the registry
//! (empty, in a freshly-started process) against the challenge catalog's
//! view of active phases so no deadline is silently dropped across a
//! restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::error::RecoveryError;
use crate::domain::models::{CatalogPhase, RecoveryConfig, ScheduleInput, TransitionState};
use crate::domain::ports::{ChallengeClient, EgressProducer};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::job_registry::{JobRegistry, PHASE_TRANSITION_TOPIC};

/// Lifecycle status of the most recent recovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    NotStarted,
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
    Disabled,
}

/// Point-in-time recovery telemetry, per spec.md §4.3.
#[derive(Debug, Clone)]
pub struct RecoveryMetrics {
    pub status: RecoveryStatus,
    pub last_recovery_time: Option<DateTime<Utc>>,
    pub last_recovery_duration_ms: Option<i64>,
    pub last_recovery_count: u64,
    pub total_recovery_operations: u64,
    pub failed_recovery_operations: u64,
}

struct MetricsInner {
    status: RecoveryStatus,
    last_recovery_time: Option<DateTime<Utc>>,
    last_recovery_duration_ms: Option<i64>,
    last_recovery_count: u64,
}

/// Outcome of one `ExecuteStartupRecovery` run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryOutcome {
    pub scheduled_count: u64,
    pub overdue_published_count: u64,
    pub skipped_count: u64,
    pub errors: Vec<String>,
}

pub struct RecoveryOrchestrator {
    challenge_client: Arc<dyn ChallengeClient>,
    registry: Arc<JobRegistry>,
    egress: Arc<dyn EgressProducer>,
    breaker: Arc<CircuitBreaker>,
    config: RecoveryConfig,
    metrics: RwLock<MetricsInner>,
    total_operations: AtomicU64,
    failed_operations: AtomicU64,
}

impl RecoveryOrchestrator {
    pub fn new(
        challenge_client: Arc<dyn ChallengeClient>,
        registry: Arc<JobRegistry>,
        egress: Arc<dyn EgressProducer>,
        config: RecoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            challenge_client,
            registry,
            egress,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::recovery()),
            config,
            metrics: RwLock::new(MetricsInner {
                status: RecoveryStatus::NotStarted,
                last_recovery_time: None,
                last_recovery_duration_ms: None,
                last_recovery_count: 0,
            }),
            total_operations: AtomicU64::new(0),
            failed_operations: AtomicU64::new(0),
        })
    }

    pub async fn metrics(&self) -> RecoveryMetrics {
        let inner = self.metrics.read().await;
        RecoveryMetrics {
            status: inner.status,
            last_recovery_time: inner.last_recovery_time,
            last_recovery_duration_ms: inner.last_recovery_duration_ms,
            last_recovery_count: inner.last_recovery_count,
            total_recovery_operations: self.total_operations.load(Ordering::Relaxed),
            failed_recovery_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }

    /// `ExecuteStartupRecovery()` (§4.3).
    pub async fn execute_startup_recovery(&self) -> Result<RecoveryOutcome, RecoveryError> {
        if !self.config.enabled {
            info!("recovery is disabled, skipping startup reconciliation");
            let mut inner = self.metrics.write().await;
            inner.status = RecoveryStatus::Disabled;
            return Ok(RecoveryOutcome::default());
        }

        {
            let mut inner = self.metrics.write().await;
            inner.status = RecoveryStatus::InProgress;
        }
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();

        let result = self.run().await;

        let duration = Utc::now() - started_at;
        let mut inner = self.metrics.write().await;
        inner.last_recovery_time = Some(started_at);
        inner.last_recovery_duration_ms = Some(duration.num_milliseconds());
        match &result {
            Ok(outcome) => {
                inner.last_recovery_count = outcome.scheduled_count + outcome.overdue_published_count;
                inner.status = if outcome.errors.is_empty() {
                    RecoveryStatus::Completed
                } else {
                    RecoveryStatus::CompletedWithErrors
                };
            }
            Err(_) => {
                self.failed_operations.fetch_add(1, Ordering::Relaxed);
                inner.status = RecoveryStatus::Failed;
            }
        }
        drop(inner);

        result
    }

    async fn run(&self) -> Result<RecoveryOutcome, RecoveryError> {
        let client = Arc::clone(&self.challenge_client);
        let phases = self
            .breaker
            .call(|| async move { client.fetch_active_phases().await }, |_| true)
            .await
            .map_err(|err| RecoveryError::CatalogFetchFailed(err.to_string()))?;

        let now = Utc::now();
        let max_age = Duration::hours(self.config.max_phase_age_hours);
        let mut outcome = RecoveryOutcome::default();
        let mut upcoming = Vec::new();
        let mut overdue = Vec::new();

        for phase in phases {
            if let Err(reason) = self.validate(&phase, now, max_age) {
                if self.config.skip_invalid_phases {
                    warn!(project_id = phase.project_id, phase_id = phase.phase_id, reason, "skipping invalid phase during recovery");
                    outcome.skipped_count += 1;
                    continue;
                }
                return Err(RecoveryError::InvalidPhaseData(reason));
            }

            if phase.end_time <= now {
                overdue.push(phase);
            } else {
                upcoming.push(phase);
            }
        }

        if self.config.process_overdue {
            for phase in overdue {
                match self.publish_overdue(&phase).await {
                    Ok(()) => outcome.overdue_published_count += 1,
                    Err(err) => {
                        outcome.errors.push(format!("phase {}: {err}", phase.phase_id));
                        if self.config.fail_on_error {
                            return Err(RecoveryError::Fatal(err.to_string()));
                        }
                    }
                }
            }
        } else {
            outcome.skipped_count += overdue.len() as u64;
        }

        let concurrency = self.config.max_concurrent_phases.max(1);
        let registry = Arc::clone(&self.registry);
        let fail_on_error = self.config.fail_on_error;

        let results: Vec<Result<(), RecoveryError>> = stream::iter(upcoming.into_iter())
            .map(|phase| {
                let registry = Arc::clone(&registry);
                async move { Self::schedule_upcoming(&registry, phase).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(()) => outcome.scheduled_count += 1,
                Err(RecoveryError::InvalidPhaseData(_)) => {
                    outcome.skipped_count += 1;
                }
                Err(err) => {
                    outcome.errors.push(err.to_string());
                    if fail_on_error {
                        return Err(err);
                    }
                }
            }
        }

        info!(
            scheduled = outcome.scheduled_count,
            overdue_published = outcome.overdue_published_count,
            skipped = outcome.skipped_count,
            errors = outcome.errors.len(),
            "startup recovery complete"
        );

        Ok(outcome)
    }

    fn validate(&self, phase: &CatalogPhase, now: DateTime<Utc>, max_age: Duration) -> Result<(), String> {
        if phase.project_id < self.config.min_project_id || phase.project_id > self.config.max_project_id {
            return Err(format!("project_id {} outside configured range", phase.project_id));
        }
        if now - phase.end_time > max_age {
            return Err(format!("phase {} is older than max_phase_age_hours", phase.phase_id));
        }
        if !self
            .config
            .allowed_project_statuses
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&phase.project_status))
        {
            return Err(format!(
                "project_status {:?} not in allowed set {:?}",
                phase.project_status, self.config.allowed_project_statuses
            ));
        }
        Ok(())
    }

    async fn publish_overdue(&self, phase: &CatalogPhase) -> Result<(), RecoveryError> {
        let payload = crate::domain::models::PhaseTransitionPayload {
            project_id: phase.project_id,
            phase_id: phase.phase_id,
            phase_type_name: phase.phase_type_name.clone(),
            state: phase.state,
            operator: phase.operator.clone(),
            project_status: phase.project_status.clone(),
            date: Some(Utc::now()),
        };
        self.egress
            .produce(PHASE_TRANSITION_TOPIC, &payload)
            .await
            .map_err(|err| RecoveryError::Fatal(err.to_string()))
    }

    async fn schedule_upcoming(registry: &JobRegistry, phase: CatalogPhase) -> Result<(), RecoveryError> {
        let input = ScheduleInput {
            project_id: phase.project_id,
            phase_id: phase.phase_id,
            phase_type_name: phase.phase_type_name,
            state: TransitionState::End,
            scheduled_time: phase.end_time,
            operator: phase.operator,
            project_status: phase.project_status,
            metadata: phase.metadata.unwrap_or_default(),
        };
        match registry.schedule(input).await {
            Ok(_) => Ok(()),
            Err(crate::domain::error::SchedulerError::DuplicateJob(_)) => Ok(()),
            Err(err) => Err(RecoveryError::Fatal(err.to_string())),
        }
    }
}
