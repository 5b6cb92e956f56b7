//! End-to-end scenarios from spec.md §8 (S1-S6), exercised against the real
//! [`JobRegistry`] timer loop, [`adjustment_engine`], and [`RecoveryOrchestrator`]
//! wired to in-memory doubles instead of a live bus/challenge service.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use autopilot_scheduler::domain::error::RecoveryError;
use autopilot_scheduler::domain::models::{
    CatalogPhase, JobStatus, RecoveryConfig, ScheduleInput, TransitionState,
};
use autopilot_scheduler::domain::ports::ChallengeClient;
use autopilot_scheduler::services::{adjustment_engine, JobRegistry, JobRegistryConfig, RecoveryOrchestrator};
use chrono::{Duration, Utc};

use common::RecordingProducer;

fn schedule_input(project_id: u64, phase_id: u64, scheduled_time: chrono::DateTime<Utc>) -> ScheduleInput {
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

/// S1: a job scheduled 200 ms out fires exactly once, with the expected
/// payload, and lands in `Completed`.
#[tokio::test]
async fn s1_fires_once_and_completes() {
    let producer = RecordingProducer::new();
    let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    let _driver = registry.start(rx);

    let job_id = registry
        .schedule(schedule_input(1, 10, Utc::now() + Duration::milliseconds(200)))
        .await
        .expect("schedule should succeed");

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let produced = producer.produced().await;
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].0, "phase.transition");
    let payload = &produced[0].1;
    assert_eq!(payload.project_id, 1);
    assert_eq!(payload.phase_id, 10);
    assert_eq!(payload.phase_type_name, "Review");
    assert_eq!(payload.state, TransitionState::End);
    assert_eq!(payload.operator, "sys");
    assert_eq!(payload.project_status, "ACTIVE");

    let jobs = registry.list_all().await;
    let job = jobs.iter().find(|j| j.job_id == job_id).expect("job retained within retention window");
    assert_eq!(job.status, JobStatus::Completed);
}

/// S2: a job cancelled before its fire time never reaches the producer.
#[tokio::test]
async fn s2_cancel_silences_fire() {
    let producer = RecordingProducer::new();
    let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    let _driver = registry.start(rx);

    let job_id = registry
        .schedule(schedule_input(1, 10, Utc::now() + Duration::milliseconds(300)))
        .await
        .unwrap();

    assert!(registry.cancel(&job_id).await);

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    assert_eq!(producer.count().await, 0);
}

/// S3: scheduling into the past is rejected and never touches the registry.
#[tokio::test]
async fn s3_past_schedule_time_rejected() {
    let producer = RecordingProducer::new();
    let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

    let result = registry.schedule(schedule_input(1, 10, Utc::now() - Duration::seconds(1))).await;
    assert!(result.is_err());

    let jobs = registry.jobs_for_project(1).await;
    assert!(jobs.is_empty());
}

/// S4: DetectChanges ignores sub-hysteresis drift and reports exactly one
/// change once the drift exceeds the 60 s band.
#[tokio::test]
async fn s4_hysteresis_then_end_time_change() {
    let producer = RecordingProducer::new();
    let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

    let t = Utc::now() + Duration::hours(2);
    registry.schedule(schedule_input(5, 50, t)).await.unwrap();

    let within_band = CatalogPhase {
        project_id: 5,
        phase_id: 50,
        phase_type_name: "Sub".to_string(),
        state: TransitionState::End,
        end_time: t + Duration::seconds(30),
        project_status: "ACTIVE".to_string(),
        operator: "op".to_string(),
        metadata: None,
    };
    let changes = adjustment_engine::detect_changes(&registry, 5, &[within_band], "op").await;
    assert!(changes.is_empty());

    let beyond_band = CatalogPhase { end_time: t + Duration::seconds(120), ..within_band };
    let changes = adjustment_engine::detect_changes(&registry, 5, &[beyond_band], "op").await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].reason, autopilot_scheduler::domain::models::ChangeReason::EndTimeChange);
    assert_eq!(changes[0].old_end_time, Some(t));
    assert_eq!(changes[0].new_end_time, t + Duration::seconds(120));
}

/// S5: a cancelled-project challenge update cancels every scheduled job for
/// that project.
#[tokio::test]
async fn s5_cancel_all_for_project() {
    let producer = RecordingProducer::new();
    let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

    for phase_id in [50u64, 51, 52] {
        registry.schedule(schedule_input(7, phase_id, Utc::now() + Duration::hours(1))).await.unwrap();
    }

    let cancelled = adjustment_engine::cancel_all_for_project(&registry, 7).await;
    assert_eq!(cancelled, 3);

    let remaining = registry.jobs_for_project(7).await;
    assert!(remaining.is_empty());
}

struct StubCatalog {
    phases: Vec<CatalogPhase>,
}

#[async_trait]
impl ChallengeClient for StubCatalog {
    async fn fetch_active_phases(&self) -> Result<Vec<CatalogPhase>, RecoveryError> {
        Ok(self.phases.clone())
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
        operator: "system".to_string(),
        metadata: None,
    }
}

/// S6: startup recovery schedules the upcoming phase and immediately
/// publishes the overdue one.
#[tokio::test]
async fn s6_startup_recovery_schedules_and_publishes_overdue() {
    let producer = RecordingProducer::new();
    let registry = JobRegistry::new(producer.clone(), JobRegistryConfig::default());

    let catalog = Arc::new(StubCatalog {
        phases: vec![
            catalog_phase(1, 1, Utc::now() + Duration::hours(1)),
            catalog_phase(1, 2, Utc::now() - Duration::minutes(30)),
        ],
    });

    let config = RecoveryConfig { process_overdue: true, ..RecoveryConfig::default() };
    let orchestrator = RecoveryOrchestrator::new(catalog, registry.clone(), producer.clone(), config);

    let outcome = orchestrator.execute_startup_recovery().await.unwrap();
    assert_eq!(outcome.scheduled_count, 1);
    assert_eq!(outcome.overdue_published_count, 1);

    let jobs = registry.jobs_for_project(1).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].fingerprint.phase_id, 1);

    let produced = producer.produced().await;
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].1.phase_id, 2);
    assert_eq!(produced[0].1.state, TransitionState::End);
}
