//! Adjustment Engine (§4.2) — reconciles a catalog snapshot against the
//! registry's current schedule for one project and applies the diff.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use crate::domain::error::AdjustmentError;
use crate::domain::models::{
    Change, ChangeReason, CatalogPhase, RescheduledEntry, ScheduleInput, TransitionState,
    ApplyResult, JobSnapshot,
};

use super::job_registry::JobRegistry;

/// Below this gap between a job's current fire time and the catalog's
/// reported end time, a change is ignored rather than churned — absorbs
/// clock skew between the challenge service and this process (§4.2).
pub const HYSTERESIS: Duration = Duration::seconds(60);

/// Compares `current_phases` (the catalog's view of one project's active
/// phases) against the registry's existing schedule and returns the set of
/// mutations needed to bring the registry in line.
pub async fn detect_changes(
    registry: &JobRegistry,
    project_id: u64,
    current_phases: &[CatalogPhase],
    operator: &str,
) -> Vec<Change> {
    let existing = registry.jobs_for_project(project_id).await;
    let existing_by_phase: HashMap<u64, &JobSnapshot> =
        existing.iter().map(|j| (j.fingerprint.phase_id, j)).collect();
    let catalog_by_phase: HashMap<u64, &CatalogPhase> =
        current_phases.iter().map(|p| (p.phase_id, p)).collect();

    let mut changes = Vec::new();

    for phase in current_phases {
        match existing_by_phase.get(&phase.phase_id) {
            None => changes.push(Change {
                project_id,
                phase_id: phase.phase_id,
                phase_type_name: phase.phase_type_name.clone(),
                reason: ChangeReason::NewPhaseSchedule,
                old_end_time: None,
                new_end_time: phase.end_time,
                operator: operator.to_string(),
                project_status: phase.project_status.clone(),
            }),
            Some(job) => {
                let drift = (phase.end_time - job.scheduled_time).abs();
                if drift > HYSTERESIS {
                    changes.push(Change {
                        project_id,
                        phase_id: phase.phase_id,
                        phase_type_name: phase.phase_type_name.clone(),
                        reason: ChangeReason::EndTimeChange,
                        old_end_time: Some(job.scheduled_time),
                        new_end_time: phase.end_time,
                        operator: operator.to_string(),
                        project_status: phase.project_status.clone(),
                    });
                }
            }
        }
    }

    for job in &existing {
        if !catalog_by_phase.contains_key(&job.fingerprint.phase_id) {
            changes.push(Change {
                project_id,
                phase_id: job.fingerprint.phase_id,
                phase_type_name: job.phase_type_name.clone(),
                reason: ChangeReason::PhaseRemoved,
                old_end_time: Some(job.scheduled_time),
                new_end_time: job.scheduled_time,
                operator: operator.to_string(),
                project_status: job.project_status.clone(),
            });
        }
    }

    changes
}

/// Applies a change set, best-effort: one change failing does not stop the
/// rest from being attempted. Errors are accumulated onto `ApplyResult`.
///
/// Condition order for each change mirrors spec.md §4.2's Apply table: a
/// `newEndTime` already in the past is past-due and only ever cancels the
/// existing job (or is a no-op if none exists) — it is never handed to
/// `Schedule`, which would reject it with `PastScheduleTime` anyway.
pub async fn apply(registry: &Arc<JobRegistry>, changes: Vec<Change>) -> ApplyResult {
    let mut result = ApplyResult::new();
    let now = chrono::Utc::now();

    for change in changes {
        if change.new_end_time <= now {
            match cancel_existing(registry, &change).await {
                Ok(Some(job_id)) => {
                    warn!(project_id = change.project_id, phase_id = change.phase_id, job_id = %job_id, "change's new end time is already past-due, cancelling instead of rescheduling");
                    result.cancelled_count += 1;
                    result.adjusted_count += 1;
                    result.cancelled.push(job_id);
                }
                Ok(None) => {
                    warn!(project_id = change.project_id, phase_id = change.phase_id, "past-due change with no matching scheduled job, nothing to cancel");
                }
                Err(err) => result.record_error(change.phase_id, err),
            }
            continue;
        }

        match change.reason {
            ChangeReason::PhaseRemoved => match cancel_existing(registry, &change).await {
                Ok(Some(job_id)) => {
                    result.cancelled_count += 1;
                    result.adjusted_count += 1;
                    result.cancelled.push(job_id);
                }
                Ok(None) => {}
                Err(err) => result.record_error(change.phase_id, err),
            },
            ChangeReason::NewPhaseSchedule => {
                let input = schedule_input_for(&change);
                match registry.schedule(input).await {
                    Ok(job_id) => {
                        info!(project_id = change.project_id, phase_id = change.phase_id, job_id = %job_id, "scheduled new phase transition");
                        result.adjusted_count += 1;
                        result.rescheduled_count += 1;
                        result.rescheduled.push(RescheduledEntry {
                            old_job_id: "none".to_string(),
                            new_job_id: job_id,
                            phase_id: change.phase_id,
                        });
                    }
                    Err(err) => result.record_error(
                        change.phase_id,
                        AdjustmentError::ApplyFailed { phase_id: change.phase_id, source: err },
                    ),
                }
            }
            ChangeReason::EndTimeChange => match cancel_existing(registry, &change).await {
                Ok(old_job_id) => {
                    let input = schedule_input_for(&change);
                    match registry.schedule(input).await {
                        Ok(new_job_id) => {
                            result.adjusted_count += 1;
                            result.rescheduled_count += 1;
                            if let Some(old_job_id) = old_job_id {
                                result.rescheduled.push(RescheduledEntry {
                                    old_job_id: old_job_id.to_string(),
                                    new_job_id,
                                    phase_id: change.phase_id,
                                });
                            }
                        }
                        Err(err) => result.record_error(
                            change.phase_id,
                            AdjustmentError::ApplyFailed { phase_id: change.phase_id, source: err },
                        ),
                    }
                }
                Err(err) => result.record_error(change.phase_id, err),
            },
        }
    }

    result
}

/// Cancels a project's phase transition job, if one is currently scheduled,
/// returning its id for logging / rescheduled-entry purposes.
async fn cancel_existing(
    registry: &JobRegistry,
    change: &Change,
) -> Result<Option<crate::domain::models::JobId>, crate::domain::error::SchedulerError> {
    let existing = registry.jobs_for_project(change.project_id).await;
    let Some(job) = existing.into_iter().find(|j| j.fingerprint.phase_id == change.phase_id) else {
        return Ok(None);
    };
    if registry.cancel(&job.job_id).await {
        Ok(Some(job.job_id))
    } else {
        warn!(project_id = change.project_id, phase_id = change.phase_id, job_id = %job.job_id, "change referenced a job that could not be cancelled");
        Ok(None)
    }
}

fn schedule_input_for(change: &Change) -> ScheduleInput {
    ScheduleInput {
        project_id: change.project_id,
        phase_id: change.phase_id,
        phase_type_name: change.phase_type_name.clone(),
        state: TransitionState::End,
        scheduled_time: change.new_end_time,
        operator: change.operator.clone(),
        project_status: change.project_status.clone(),
        metadata: Default::default(),
    }
}

/// `CancelAllForProject(projectId)` (§4.2) — used when a challenge completes
/// or is cancelled outright.
pub async fn cancel_all_for_project(registry: &JobRegistry, project_id: u64) -> u32 {
    registry.cancel_all_for_project(project_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::BusError;
    use crate::domain::models::PhaseTransitionPayload;
    use crate::services::job_registry::JobRegistryConfig;
    use async_trait::async_trait;
    use chrono::Utc;

    struct NoopProducer;

    #[async_trait]
    impl crate::domain::ports::EgressProducer for NoopProducer {
        async fn produce(&self, _topic: &str, _payload: &PhaseTransitionPayload) -> Result<(), BusError> {
            Ok(())
        }
        async fn produce_batch(&self, _topic: &str, _payloads: &[PhaseTransitionPayload]) -> Result<(), BusError> {
            Ok(())
        }
        async fn send_to_dlq(&self, _t: &str, _b: &[u8], _e: &str) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn catalog_phase(phase_id: u64, end_time: chrono::DateTime<Utc>) -> CatalogPhase {
        CatalogPhase {
            project_id: 1,
            phase_id,
            phase_type_name: "Submission".to_string(),
            state: TransitionState::End,
            end_time,
            project_status: "ACTIVE".to_string(),
            operator: "system".to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn new_phase_not_in_registry_is_a_new_schedule() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        let phases = vec![catalog_phase(100, Utc::now() + Duration::hours(1))];

        let changes = detect_changes(&registry, 1, &phases, "system").await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reason, ChangeReason::NewPhaseSchedule);
    }

    #[tokio::test]
    async fn small_drift_is_ignored_by_hysteresis() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        let end_time = Utc::now() + Duration::hours(1);
        registry
            .schedule(ScheduleInput {
                project_id: 1,
                phase_id: 100,
                phase_type_name: "Submission".to_string(),
                state: TransitionState::End,
                scheduled_time: end_time,
                operator: "system".to_string(),
                project_status: "ACTIVE".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let drifted = catalog_phase(100, end_time + Duration::seconds(10));
        let changes = detect_changes(&registry, 1, &[drifted], "system").await;
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn large_drift_produces_end_time_change() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        let end_time = Utc::now() + Duration::hours(1);
        registry
            .schedule(ScheduleInput {
                project_id: 1,
                phase_id: 100,
                phase_type_name: "Submission".to_string(),
                state: TransitionState::End,
                scheduled_time: end_time,
                operator: "system".to_string(),
                project_status: "ACTIVE".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let drifted = catalog_phase(100, end_time + Duration::minutes(10));
        let changes = detect_changes(&registry, 1, &[drifted], "system").await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reason, ChangeReason::EndTimeChange);
    }

    #[tokio::test]
    async fn phase_absent_from_catalog_is_removed() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        registry
            .schedule(ScheduleInput {
                project_id: 1,
                phase_id: 100,
                phase_type_name: "Submission".to_string(),
                state: TransitionState::End,
                scheduled_time: Utc::now() + Duration::hours(1),
                operator: "system".to_string(),
                project_status: "ACTIVE".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let changes = detect_changes(&registry, 1, &[], "system").await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reason, ChangeReason::PhaseRemoved);
    }

    #[tokio::test]
    async fn apply_schedules_and_reschedules() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        let changes = vec![Change {
            project_id: 1,
            phase_id: 200,
            phase_type_name: "Review".to_string(),
            reason: ChangeReason::NewPhaseSchedule,
            old_end_time: None,
            new_end_time: Utc::now() + Duration::hours(2),
            operator: "system".to_string(),
            project_status: "ACTIVE".to_string(),
        }];

        let result = apply(&registry, changes).await;
        assert!(result.success);
        assert_eq!(result.adjusted_count, 1);
        assert_eq!(result.rescheduled_count, 1);
        assert_eq!(result.rescheduled.len(), 1);
        assert_eq!(result.rescheduled[0].old_job_id, "none");

        let remaining = registry.jobs_for_project(1).await;
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn apply_cancels_instead_of_rescheduling_when_past_due() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        registry
            .schedule(ScheduleInput {
                project_id: 1,
                phase_id: 400,
                phase_type_name: "Review".to_string(),
                state: TransitionState::End,
                scheduled_time: Utc::now() + Duration::hours(1),
                operator: "system".to_string(),
                project_status: "ACTIVE".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let changes = vec![Change {
            project_id: 1,
            phase_id: 400,
            phase_type_name: "Review".to_string(),
            reason: ChangeReason::EndTimeChange,
            old_end_time: Some(Utc::now() + Duration::hours(1)),
            new_end_time: Utc::now() - Duration::seconds(5),
            operator: "system".to_string(),
            project_status: "ACTIVE".to_string(),
        }];

        let result = apply(&registry, changes).await;
        assert!(result.success);
        assert_eq!(result.cancelled_count, 1);
        assert_eq!(result.rescheduled_count, 0);
        assert_eq!(result.adjusted_count, 1);
        assert!(registry.jobs_for_project(1).await.is_empty());
    }

    #[tokio::test]
    async fn apply_cancels_removed_phase() {
        let registry = JobRegistry::new(Arc::new(NoopProducer), JobRegistryConfig::default());
        registry
            .schedule(ScheduleInput {
                project_id: 1,
                phase_id: 300,
                phase_type_name: "Review".to_string(),
                state: TransitionState::End,
                scheduled_time: Utc::now() + Duration::hours(1),
                operator: "system".to_string(),
                project_status: "ACTIVE".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let changes = vec![Change {
            project_id: 1,
            phase_id: 300,
            phase_type_name: "Review".to_string(),
            reason: ChangeReason::PhaseRemoved,
            old_end_time: Some(Utc::now() + Duration::hours(1)),
            new_end_time: Utc::now() + Duration::hours(1),
            operator: "system".to_string(),
            project_status: "CANCELLED".to_string(),
        }];

        let result = apply(&registry, changes).await;
        assert_eq!(result.cancelled_count, 1);
        assert_eq!(result.adjusted_count, 1);
        assert!(registry.jobs_for_project(1).await.is_empty());
    }
}
