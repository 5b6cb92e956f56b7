//! Property-based tests for P1 (uniqueness), P2 (no past schedules), P6
//! (diff idempotence), and P7 (hysteresis) from spec.md §8.
//!
//! The registry's API is async; each property drives it to completion with
//! a fresh current-thread runtime per case rather than `#[tokio::test]`,
//! since `proptest!` generates plain synchronous test functions.

mod common;

use autopilot_scheduler::domain::models::{CatalogPhase, JobStatus, ScheduleInput, TransitionState};
use autopilot_scheduler::services::{adjustment_engine, JobRegistry, JobRegistryConfig};
use chrono::{Duration, Utc};
use proptest::prelude::*;
use test_strategy::Arbitrary;

use common::RecordingProducer;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(fut)
}

fn schedule_input(project_id: u64, phase_id: u64, offset_ms: i64) -> ScheduleInput {
    ScheduleInput {
        project_id,
        phase_id,
        phase_type_name: "Review".to_string(),
        state: TransitionState::End,
        scheduled_time: Utc::now() + Duration::milliseconds(offset_ms),
        operator: "sys".to_string(),
        project_status: "ACTIVE".to_string(),
        metadata: Default::default(),
    }
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Op {
    Schedule,
    Cancel,
}

proptest! {
    /// P1: at most one job with a given fingerprint is `Scheduled` or
    /// `Running` at any instant, across an arbitrary Schedule/Cancel sequence
    /// against a single fixed fingerprint.
    #[test]
    fn prop_p1_fingerprint_uniqueness(ops in prop::collection::vec(any::<Op>(), 1..20)) {
        block_on(async {
            let producer = RecordingProducer::new();
            let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());
            let mut last_job_id = None;

            for op in ops {
                match op {
                    Op::Schedule => {
                        let input = schedule_input(1, 1, 60_000);
                        if let Ok(job_id) = registry.schedule(input).await {
                            last_job_id = Some(job_id);
                        }
                    }
                    Op::Cancel => {
                        if let Some(job_id) = &last_job_id {
                            registry.cancel(job_id).await;
                        }
                    }
                }

                let holding = registry
                    .list_all()
                    .await
                    .into_iter()
                    .filter(|j| j.fingerprint.project_id == 1 && j.fingerprint.phase_id == 1)
                    .filter(|j| matches!(j.status, JobStatus::Scheduled | JobStatus::Running))
                    .count();
                prop_assert!(holding <= 1, "expected at most one live job, found {holding}");
            }
        });
    }

    /// P2: a `Schedule` call only succeeds when `scheduledTime > insertionTime`.
    /// Generated offsets keep clear of the zero boundary (real wall-clock
    /// time elapses between computing `scheduledTime` and the registry's own
    /// `now()` check, so only offsets clearly on one side are deterministic).
    #[test]
    fn prop_p2_no_past_schedules(offset_ms in prop_oneof![-5_000i64..-100, 100i64..5_000]) {
        block_on(async {
            let producer = RecordingProducer::new();
            let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

            let result = registry.schedule(schedule_input(2, 2, offset_ms)).await;

            if offset_ms > 0 {
                prop_assert!(result.is_ok(), "a future scheduledTime must be accepted");
            } else {
                prop_assert!(result.is_err(), "a past scheduledTime must be rejected");
            }
        });
    }

    /// P6: applying `DetectChanges` twice in succession against an unchanged
    /// registry and catalog returns an empty set the second time.
    #[test]
    fn prop_p6_diff_idempotence(end_time_offset_hours in 1i64..48) {
        block_on(async {
            let producer = RecordingProducer::new();
            let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

            let t = Utc::now() + Duration::hours(end_time_offset_hours);
            registry.schedule(schedule_input_at(3, 30, t)).await.unwrap();

            let catalog = vec![catalog_phase(3, 30, t)];
            let first = adjustment_engine::detect_changes(&registry, 3, &catalog, "op").await;
            prop_assert!(first.is_empty(), "catalog matches registry exactly, expected no changes");

            let second = adjustment_engine::detect_changes(&registry, 3, &catalog, "op").await;
            prop_assert!(second.is_empty(), "repeated DetectChanges against an unchanged state must stay empty");
        });
    }

    /// P7: `DetectChanges` stays empty while the catalog's `endTime` drifts
    /// from the registry's `scheduledTime` by no more than the 60 s
    /// hysteresis band, in either direction.
    #[test]
    fn prop_p7_hysteresis(drift_secs in -59i64..=59) {
        block_on(async {
            let producer = RecordingProducer::new();
            let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

            let t = Utc::now() + Duration::hours(1);
            registry.schedule(schedule_input_at(4, 40, t)).await.unwrap();

            let catalog = vec![catalog_phase(4, 40, t + Duration::seconds(drift_secs))];
            let changes = adjustment_engine::detect_changes(&registry, 4, &catalog, "op").await;
            prop_assert!(changes.is_empty(), "drift of {drift_secs}s is within the hysteresis band");
        });
    }
}

fn schedule_input_at(project_id: u64, phase_id: u64, scheduled_time: chrono::DateTime<Utc>) -> ScheduleInput {
    ScheduleInput {
        project_id,
        phase_id,
        phase_type_name: "Review".to_string(),
        state: TransitionState::End,
        scheduled_time,
        operator: "sys".to_string(),
        project_status: "ACTIVE".to_string(),
        metadata: Default::default(),
    }
}

fn catalog_phase(project_id: u64, phase_id: u64, end_time: chrono::DateTime<Utc>) -> CatalogPhase {
    CatalogPhase {
        project_id,
        phase_id,
        phase_type_name: "Review".to_string(),
        state: TransitionState::End,
        end_time,
        project_status: "ACTIVE".to_string(),
        operator: "op".to_string(),
        metadata: None,
    }
}
