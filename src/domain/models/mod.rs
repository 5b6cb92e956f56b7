//! Domain value types shared across the scheduler core.

pub mod change;
pub mod config;
pub mod job;
pub mod phase;

pub use change::{ApplyResult, Change, ChangeReason, RescheduledEntry};
pub use config::{AppConfig, BusConfig, Config, Environment, RecoveryConfig, SchedulerConfig};
pub use job::{Fingerprint, JobId, JobRecord, JobSnapshot, JobStatus, Metadata, ScheduleInput, TransitionState};
pub use phase::{
    BusEnvelope, CatalogPhase, ChallengeUpdatePayload, ChallengeUpdatePhase, CommandPayload,
    PhaseTransitionPayload,
};
