//! Job Registry & Timer Engine (§4.1).
//!
//! A single driving task holds a min-heap of `(scheduledTime, jobId)` and
//! wakes on the nearest deadline, or immediately when `Schedule`/`Cancel`/
//! `Update` touch the heap — one central scheduler rather than one OS timer
//! per job (per the REDESIGN FLAGS in spec.md §9). The job map and heap
//! share one `Mutex` so `Schedule`, `Cancel`, `Update`, `ListAll`, and the
//! internal fire transition all observe the same critical section (§5).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::domain::error::SchedulerError;
use crate::domain::models::{
    Fingerprint, JobId, JobRecord, JobSnapshot, JobStatus, PhaseTransitionPayload, ScheduleInput,
};
use crate::domain::ports::EgressProducer;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

/// Topic phase-transition payloads are published to.
pub const PHASE_TRANSITION_TOPIC: &str = "phase.transition";

struct HeapEntry {
    scheduled_time: DateTime<Utc>,
    job_id: JobId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_time == other.scheduled_time && self.job_id == other.job_id
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.scheduled_time, &self.job_id).cmp(&(other.scheduled_time, &other.job_id))
    }
}

struct RegistryState {
    jobs: HashMap<JobId, JobRecord>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl RegistryState {
    fn new() -> Self {
        Self { jobs: HashMap::new(), heap: BinaryHeap::new() }
    }

    fn fingerprint_locked(&self, fingerprint: Fingerprint) -> bool {
        self.jobs.values().any(|j| j.fingerprint == fingerprint && j.status.holds_fingerprint())
    }
}

/// Configuration for retention and fire-time behavior, independent of the
/// process-wide `SchedulerConfig` (kept small and local to this module).
#[derive(Debug, Clone)]
pub struct JobRegistryConfig {
    pub retention_window: ChronoDuration,
    pub reaper_tick: std::time::Duration,
}

impl Default for JobRegistryConfig {
    fn default() -> Self {
        Self {
            retention_window: ChronoDuration::minutes(5),
            reaper_tick: std::time::Duration::from_secs(30),
        }
    }
}

/// Owns scheduled future firings and delivers each exactly once through the
/// Egress Producer.
pub struct JobRegistry {
    state: Mutex<RegistryState>,
    notify: Notify,
    egress: Arc<dyn EgressProducer>,
    breaker: Arc<CircuitBreaker>,
    config: JobRegistryConfig,
}

impl JobRegistry {
    pub fn new(egress: Arc<dyn EgressProducer>, config: JobRegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::new()),
            notify: Notify::new(),
            egress,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::scheduler()),
            config,
        })
    }

    /// `Schedule(input) -> jobId` (§4.1).
    pub async fn schedule(&self, input: ScheduleInput) -> Result<JobId, SchedulerError> {
        let now = Utc::now();
        if input.scheduled_time <= now {
            return Err(SchedulerError::PastScheduleTime(input.scheduled_time));
        }

        let fingerprint = input.fingerprint();
        let mut state = self.state.lock().await;
        if state.fingerprint_locked(fingerprint) {
            return Err(SchedulerError::DuplicateJob(fingerprint.to_string()));
        }

        let job_id = JobId::generate(fingerprint);
        let scheduled_time = input.scheduled_time;
        let record = JobRecord::new(job_id.clone(), input);
        state.jobs.insert(job_id.clone(), record);
        state.heap.push(Reverse(HeapEntry { scheduled_time, job_id: job_id.clone() }));
        drop(state);

        self.notify.notify_one();
        debug!(job_id = %job_id, fingerprint = %fingerprint, "job scheduled");
        Ok(job_id)
    }

    /// `Cancel(jobId) -> bool` (§4.1). Idempotent.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state.jobs.get_mut(job_id) else {
            return false;
        };
        if record.status != JobStatus::Scheduled {
            return false;
        }
        record.status = JobStatus::Cancelled;
        record.terminated_at = Some(Utc::now());
        drop(state);

        self.notify.notify_one();
        info!(job_id = %job_id, "job cancelled");
        true
    }

    /// `Update(jobId, input) -> newJobId` — cancel then schedule, atomically
    /// w.r.t. other registry mutations (§4.1, §5: cancel observed before the
    /// new schedule is inserted).
    pub async fn update(&self, job_id: &JobId, input: ScheduleInput) -> Result<JobId, SchedulerError> {
        let now = Utc::now();
        if input.scheduled_time <= now {
            return Err(SchedulerError::PastScheduleTime(input.scheduled_time));
        }

        let mut state = self.state.lock().await;
        let Some(record) = state.jobs.get_mut(job_id) else {
            return Err(SchedulerError::JobNotFound(job_id.clone()));
        };
        if record.status != JobStatus::Scheduled {
            return Err(SchedulerError::JobNotFound(job_id.clone()));
        }
        record.status = JobStatus::Cancelled;
        record.terminated_at = Some(Utc::now());

        let fingerprint = input.fingerprint();
        let new_job_id = JobId::generate(fingerprint);
        let scheduled_time = input.scheduled_time;
        let new_record = JobRecord::new(new_job_id.clone(), input);
        state.jobs.insert(new_job_id.clone(), new_record);
        state.heap.push(Reverse(HeapEntry { scheduled_time, job_id: new_job_id.clone() }));
        drop(state);

        self.notify.notify_one();
        info!(old_job_id = %job_id, new_job_id = %new_job_id, "job updated");
        Ok(new_job_id)
    }

    /// `ListAll() -> [JobSnapshot]` — point-in-time copy.
    pub async fn list_all(&self) -> Vec<JobSnapshot> {
        let state = self.state.lock().await;
        state.jobs.values().map(JobRecord::snapshot).collect()
    }

    /// Cancel every job whose fingerprint matches `project_id` (used by
    /// `CancelAllForProject`, §4.2).
    pub async fn cancel_all_for_project(&self, project_id: u64) -> u32 {
        let mut state = self.state.lock().await;
        let mut count = 0u32;
        for record in state.jobs.values_mut() {
            if record.fingerprint.project_id == project_id && record.status == JobStatus::Scheduled {
                record.status = JobStatus::Cancelled;
                record.terminated_at = Some(Utc::now());
                count += 1;
            }
        }
        drop(state);
        if count > 0 {
            self.notify.notify_one();
        }
        count
    }

    /// Snapshot of the jobs whose fingerprint's `project_id` matches, used by
    /// the Adjustment Engine to compute a diff against a catalog snapshot.
    pub async fn jobs_for_project(&self, project_id: u64) -> Vec<JobSnapshot> {
        let state = self.state.lock().await;
        state
            .jobs
            .values()
            .filter(|j| j.fingerprint.project_id == project_id && j.status == JobStatus::Scheduled)
            .map(JobRecord::snapshot)
            .collect()
    }

    /// Spawn the driving task (timer loop) and the retention reaper. Both
    /// stop when `shutdown` fires; the driving task does not emit any
    /// in-flight firing during shutdown (§5: "no best-effort emit during
    /// shutdown").
    pub fn start(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let next_deadline = registry.peek_next_deadline().await;

                let wait = async {
                    match next_deadline {
                        Some(at) => {
                            let now = Utc::now();
                            if at <= now {
                                return;
                            }
                            let std_dur = (at - now).to_std().unwrap_or(std::time::Duration::from_millis(1));
                            tokio::time::sleep(std_dur).await;
                        }
                        None => {
                            registry.notify.notified().await;
                        }
                    }
                };

                tokio::select! {
                    _ = wait => {}
                    _ = registry.notify.notified() => {}
                    _ = shutdown.recv() => {
                        info!("job registry timer loop received shutdown signal");
                        break;
                    }
                }

                registry.fire_due_jobs().await;
            }
        })
    }

    /// Spawn the periodic reaper that purges terminal jobs past the
    /// retention window (invariant I3).
    pub fn start_reaper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let tick = self.config.reaper_tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.reap_terminal_jobs().await;
                    }
                    _ = shutdown.recv() => {
                        break;
                    }
                }
            }
        })
    }

    async fn peek_next_deadline(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.heap.peek().map(|Reverse(entry)| entry.scheduled_time)
    }

    async fn reap_terminal_jobs(&self) {
        let cutoff = Utc::now() - self.config.retention_window;
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, record| match record.terminated_at {
            Some(terminated_at) => terminated_at > cutoff,
            None => true,
        });
        let removed = before - state.jobs.len();
        if removed > 0 {
            debug!(removed, "reaped terminal jobs past retention window");
        }
    }

    /// Pop every heap entry whose time has arrived, skip stale entries
    /// (cancelled/superseded since being pushed), and fire the rest.
    async fn fire_due_jobs(&self) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut state = self.state.lock().await;
            while let Some(Reverse(entry)) = state.heap.peek() {
                if entry.scheduled_time > now {
                    break;
                }
                let Reverse(entry) = state.heap.pop().expect("just peeked");
                let still_due = state
                    .jobs
                    .get(&entry.job_id)
                    .is_some_and(|r| r.status == JobStatus::Scheduled && r.scheduled_time == entry.scheduled_time);
                if still_due {
                    due.push(entry.job_id);
                }
            }
        }

        for job_id in due {
            self.fire_one(&job_id).await;
        }
    }

    /// Transition `Scheduled -> Running`, emit via the Egress Producer, then
    /// `Running -> {Completed | Failed}`. The emit side effect is performed
    /// while the job is held `Running` so a concurrent `Cancel` cannot race
    /// a double-emit (§5).
    async fn fire_one(&self, job_id: &JobId) {
        let payload = {
            let mut state = self.state.lock().await;
            let Some(record) = state.jobs.get_mut(job_id) else {
                return;
            };
            if record.status != JobStatus::Scheduled {
                return;
            }
            record.status = JobStatus::Running;
            PhaseTransitionPayload {
                project_id: record.fingerprint.project_id,
                phase_id: record.fingerprint.phase_id,
                phase_type_name: record.phase_type_name.clone(),
                state: record.state,
                operator: record.operator.clone(),
                project_status: record.project_status.clone(),
                date: Some(Utc::now()),
            }
        };

        let egress = Arc::clone(&self.egress);
        let topic = PHASE_TRANSITION_TOPIC;
        let result = self
            .breaker
            .call(|| async move { egress.produce(topic, &payload).await }, |_| true)
            .await;

        let mut state = self.state.lock().await;
        if let Some(record) = state.jobs.get_mut(job_id) {
            match result {
                Ok(()) => {
                    record.status = JobStatus::Completed;
                    record.terminated_at = Some(Utc::now());
                }
                Err(err) => {
                    record.status = JobStatus::Failed;
                    record.retry_count += 1;
                    record.last_error = Some(format_breaker_error(&err));
                    record.terminated_at = Some(Utc::now());
                    error!(job_id = %job_id, error = %format_breaker_error(&err), "phase transition emit failed");
                }
            }
        }
    }
}

fn format_breaker_error<E: std::fmt::Display>(err: &CircuitBreakerError<E>) -> String {
    match err {
        CircuitBreakerError::Open { retry_after } => format!("circuit open, retry after {retry_after}"),
        CircuitBreakerError::Timeout => "operation timed out".to_string(),
        CircuitBreakerError::OperationFailed(e) => e.to_string(),
    }
}
