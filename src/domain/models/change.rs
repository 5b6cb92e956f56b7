//! The diff between a catalog snapshot and the registry (Adjustment Engine).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobId;

/// Why a `Change` was produced by `DetectChanges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    NewPhaseSchedule,
    EndTimeChange,
    PhaseRemoved,
}

/// A single proposed mutation to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub project_id: u64,
    pub phase_id: u64,
    pub phase_type_name: String,
    pub reason: ChangeReason,
    pub old_end_time: Option<DateTime<Utc>>,
    pub new_end_time: DateTime<Utc>,
    pub operator: String,
    pub project_status: String,
}

/// One cancellation or reschedule performed while applying a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduledEntry {
    pub old_job_id: String,
    pub new_job_id: JobId,
    pub phase_id: u64,
}

/// Aggregate result of `Apply`, accumulated across a best-effort batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: bool,
    pub adjusted_count: u32,
    pub cancelled_count: u32,
    pub rescheduled_count: u32,
    pub errors: Vec<String>,
    pub cancelled: Vec<JobId>,
    pub rescheduled: Vec<RescheduledEntry>,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self { success: true, ..Default::default() }
    }

    pub fn record_error(&mut self, phase_id: u64, message: impl std::fmt::Display) {
        self.success = false;
        self.errors.push(format!("Phase {phase_id}: {message}"));
    }
}
