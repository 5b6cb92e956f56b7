//! Typed error taxonomy for the scheduler core, per spec.md §7.
//!
//! Each enum groups the errors raised by one component, following this
//! codebase's existing split of `TaskError` / `DatabaseError` / `ClaudeApiError`
//! into one `thiserror` enum per concern rather than a single catch-all type.

use thiserror::Error;

use crate::domain::models::JobId;

/// Errors returned by the Job Registry & Timer Engine (§4.1).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("scheduled time {0} is not in the future")]
    PastScheduleTime(chrono::DateTime<chrono::Utc>),

    #[error("a job for fingerprint {0} is already scheduled or running")]
    DuplicateJob(String),

    #[error("job {0} was not found or is not cancellable")]
    JobNotFound(JobId),

    #[error("timer engine failed to arm job: {0}")]
    SchedulingFailed(String),

    #[error("timer engine failed to cancel job: {0}")]
    CancellationFailed(String),
}

impl SchedulerError {
    /// 4xx-equivalent errors are expected caller mistakes, not faults.
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::PastScheduleTime(_) | Self::DuplicateJob(_) | Self::JobNotFound(_))
    }
}

/// Errors from the Adjustment Engine (§4.2).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdjustmentError {
    #[error("failed to apply change for phase {phase_id}: {source}")]
    ApplyFailed { phase_id: u64, source: SchedulerError },
}

/// Errors from the Recovery Orchestrator (§4.3).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("invalid phase data: {0}")]
    InvalidPhaseData(String),

    #[error("failed to fetch active phases from challenge catalog: {0}")]
    CatalogFetchFailed(String),

    #[error("recovery aborted: {0}")]
    Fatal(String),
}

/// Errors from the bus transport (ingress and egress), per §7.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("producer failed to publish to {topic}: {reason}")]
    ProducerError { topic: String, reason: String },

    #[error("consumer failed to decode message on {topic}: {reason}")]
    ConsumerError { topic: String, reason: String },

    #[error("schema registry error: {0}")]
    SchemaRegistryError(String),

    #[error("circuit open for {scope}, retry after {retry_after}")]
    CircuitOpen {
        scope: String,
        retry_after: chrono::DateTime<chrono::Utc>,
    },

    #[error("connectivity probe to bus failed: {0}")]
    ProbeFailed(String),
}

/// Errors raised while loading and validating configuration (§9.3).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to extract configuration: {0}")]
    ExtractFailed(String),

    #[error("{field} is invalid: {reason}")]
    Invalid { field: String, reason: String },

    #[error("production environment requires a reachable bus broker")]
    ProductionProbeFailed,
}
