//! Scheduled job records and the values that flow through the registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `(projectId, phaseId)` — unique within the system at any instant.
///
/// At most one job with a given fingerprint may be `Scheduled` or `Running`
/// (invariant I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    pub project_id: u64,
    pub phase_id: u64,
}

impl Fingerprint {
    pub const fn new(project_id: u64, phase_id: u64) -> Self {
        Self { project_id, phase_id }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project_id, self.phase_id)
    }
}

/// The transition edge a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionState {
    Start,
    End,
}

impl TransitionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::End => "END",
        }
    }
}

impl fmt::Display for TransitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "START" => Ok(Self::Start),
            "END" => Ok(Self::End),
            other => Err(format!("unknown transition state: {other}")),
        }
    }
}

/// Lifecycle status of a scheduled job.
///
/// `Scheduled -> Running -> {Completed | Failed}`, or `Scheduled -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Jobs in these statuses hold the fingerprint lock (invariant I2).
    pub const fn holds_fingerprint(self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    /// Jobs in these statuses are terminal and subject to the retention reaper.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Opaque, globally-unique job identifier.
///
/// Format: `phase-transition-<projectId>-<phaseId>-<uuid>`, per spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Mint a fresh id for the given fingerprint.
    pub fn generate(fingerprint: Fingerprint) -> Self {
        Self(format!(
            "phase-transition-{}-{}-{}",
            fingerprint.project_id,
            fingerprint.phase_id,
            Uuid::new_v4()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Opaque metadata carried through schedule -> emit unexamined.
pub type Metadata = std::collections::BTreeMap<String, serde_json::Value>;

/// Inputs required to schedule a new job (§4.1 `Schedule`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub project_id: u64,
    pub phase_id: u64,
    pub phase_type_name: String,
    pub state: TransitionState,
    pub scheduled_time: DateTime<Utc>,
    pub operator: String,
    pub project_status: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScheduleInput {
    pub const fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.project_id, self.phase_id)
    }
}

/// A scheduled job record, as owned by the Job Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub phase_type_name: String,
    pub state: TransitionState,
    pub scheduled_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub operator: String,
    pub project_status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub metadata: Metadata,
    /// When the job entered a terminal status; drives the retention reaper.
    pub terminated_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: JobId, input: ScheduleInput) -> Self {
        Self {
            job_id,
            fingerprint: input.fingerprint(),
            phase_type_name: input.phase_type_name,
            state: input.state,
            scheduled_time: input.scheduled_time,
            created_at: Utc::now(),
            status: JobStatus::Scheduled,
            operator: input.operator,
            project_status: input.project_status,
            retry_count: 0,
            last_error: None,
            metadata: input.metadata,
            terminated_at: None,
        }
    }

    /// Point-in-time, owned copy returned by `ListAll`.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            fingerprint: self.fingerprint,
            phase_type_name: self.phase_type_name.clone(),
            state: self.state,
            scheduled_time: self.scheduled_time,
            created_at: self.created_at,
            status: self.status,
            operator: self.operator.clone(),
            project_status: self.project_status.clone(),
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only snapshot returned by `ListAll` (registry ownership stays internal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub phase_type_name: String,
    pub state: TransitionState,
    pub scheduled_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub operator: String,
    pub project_status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
}
