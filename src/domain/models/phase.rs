//! Bus payload shapes and the phase-catalog representation consumed by recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Metadata, TransitionState};

/// `{topic, originator, timestamp, mimeType, payload}` — the envelope every
/// message carries across the bus, per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope<P> {
    pub topic: String,
    pub originator: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub payload: P,
}

impl<P> BusEnvelope<P> {
    /// Construct an outbound envelope, stamping `originator: auto_pilot` per §6.
    pub fn outbound(topic: impl Into<String>, payload: P) -> Self {
        Self {
            topic: topic.into(),
            originator: "auto_pilot".to_string(),
            timestamp: Utc::now(),
            mime_type: "application/json".to_string(),
            payload,
        }
    }
}

/// Phase-transition payload, consumed on ingress and produced on egress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransitionPayload {
    pub project_id: u64,
    pub phase_id: u64,
    pub phase_type_name: String,
    pub state: TransitionState,
    pub operator: String,
    pub project_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// A single phase entry inside a "detailed" challenge update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeUpdatePhase {
    pub phase_id: u64,
    pub phase_type_name: String,
    pub end_time: DateTime<Utc>,
    pub phase_status: String,
}

/// `challenge.update` payload, with the optional "detailed" extension inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeUpdatePayload {
    pub project_id: u64,
    pub challenge_id: u64,
    pub status: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<ChallengeUpdatePhase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_reason: Option<String>,
}

impl ChallengeUpdatePayload {
    /// A "detailed" update carries a phase list and a project status.
    pub fn is_detailed(&self) -> bool {
        self.phases.is_some() && self.project_status.is_some()
    }
}

/// `command` payload. Base fields are exactly spec.md §3's
/// `{command, operator, projectId?, date?}`; the remaining fields are
/// additional optional arguments each named command in §4.4 needs to carry
/// its own parameters (`schedule_phase_transition` needs a phase and a
/// target time, `cancel_scheduled_transition` needs a job id) — the spec
/// leaves the exact argument shape per command unspecified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TransitionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// A single entry from `GET /phases/active` (challenge catalog interface, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPhase {
    pub project_id: u64,
    pub phase_id: u64,
    pub phase_type_name: String,
    pub state: TransitionState,
    pub end_time: DateTime<Utc>,
    pub project_status: String,
    pub operator: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}
