//! Circuit breaker (§4.6) — shared resilience primitive used by the egress
//! producer, the job-registry timer firings, recovery's catalog fetch, and
//! the challenge-service client. Each call site gets its own named instance
//! with its own thresholds; state is never shared across scopes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

/// Three-state machine per spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Thresholds for one circuit breaker instance. Defaults vary per call-site
/// (producer 10/45s, scheduler 5/60s, recovery 3/120s, challenge-service
/// 5/30s), so this type is always constructed explicitly rather than via a
/// single blanket `Default`.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub operation_timeout: Duration,
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub const fn new(failure_threshold: u32, reset_timeout_secs: i64, operation_timeout_secs: i64, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout: Duration::seconds(reset_timeout_secs),
            operation_timeout: Duration::seconds(operation_timeout_secs),
            success_threshold,
        }
    }

    /// Producer: 10 failures / 45s reset / default op timeout / 2 successes to close.
    pub const fn producer() -> Self {
        Self::new(10, 45, 30, 2)
    }

    /// Scheduler (job-fire path): 5 failures / 60s reset.
    pub const fn scheduler() -> Self {
        Self::new(5, 60, 30, 2)
    }

    /// Recovery's catalog fetch: 3 failures / 120s reset.
    pub const fn recovery() -> Self {
        Self::new(3, 120, 30, 1)
    }

    /// Challenge-service client: 5 failures / 30s reset.
    pub const fn challenge_service() -> Self {
        Self::new(5, 30, 30, 2)
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    failures: u32,
    successes: u32,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    half_open_successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
}

struct Inner {
    state: CircuitState,
    state_changed_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    counters: Counters,
}

/// Point-in-time metrics for a circuit breaker, per spec.md §4.6.
#[derive(Debug, Clone)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub total_calls: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    pub failure_rate: f64,
    pub success_rate: f64,
}

/// Error returned by a circuit-breaker-protected call.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open and the call was rejected without running.
    Open {
        retry_after: DateTime<Utc>,
    },
    /// The call ran but exceeded `operation_timeout`.
    Timeout,
    /// The call ran and returned an error (counted, unless filtered out).
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { retry_after } => write!(f, "circuit open, retry after {retry_after}"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::OperationFailed(e) => write!(f, "operation failed: {e}"),
        }
    }
}

/// A single named circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                state_changed_at: Utc::now(),
                opened_at: None,
                counters: Counters::default(),
            }),
        })
    }

    /// Current state, resolving `Open -> HalfOpen` if the reset timeout elapsed.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.write().await;
        self.resolve_timeout(&mut inner);
        inner.state
    }

    fn resolve_timeout(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if Utc::now() > opened_at + self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.state_changed_at = Utc::now();
                    inner.counters.half_open_successes = 0;
                }
            }
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Utc::now());
        inner.state_changed_at = Utc::now();
        inner.counters.half_open_successes = 0;
    }

    fn close(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.state_changed_at = Utc::now();
        inner.counters.failures = 0;
        inner.counters.half_open_successes = 0;
    }

    /// Run `f` under this circuit's protection, with an optional `error_filter`
    /// deciding whether an `Err` counts toward the failure threshold (e.g. to
    /// ignore client-caused 4xx-equivalent errors).
    pub async fn call<F, Fut, T, E>(
        self: &Arc<Self>,
        f: F,
        error_filter: impl Fn(&E) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.write().await;
            self.resolve_timeout(&mut inner);
            if inner.state == CircuitState::Open {
                let retry_after = inner.opened_at.unwrap_or_else(Utc::now) + self.config.reset_timeout;
                return Err(CircuitBreakerError::Open { retry_after });
            }
            inner.counters.total_calls += 1;
        }

        let timeout = StdDuration::from_millis(self.config.operation_timeout.num_milliseconds().max(0) as u64);
        let outcome = tokio::time::timeout(timeout, f()).await;

        match outcome {
            Err(_elapsed) => {
                self.record_failure(true).await;
                Err(CircuitBreakerError::Timeout)
            }
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                if error_filter(&err) {
                    self.record_failure(true).await;
                } else {
                    self.record_failure(false).await;
                }
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.counters.total_successes += 1;
        inner.counters.last_success_time = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.counters.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.counters.half_open_successes += 1;
                if inner.counters.half_open_successes >= self.config.success_threshold {
                    self.close(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self, counted: bool) {
        let mut inner = self.inner.write().await;
        inner.counters.last_failure_time = Some(Utc::now());
        if !counted {
            return;
        }
        inner.counters.total_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.counters.failures += 1;
                if inner.counters.failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Manually reset to `Closed`.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        self.close(&mut inner);
    }

    pub async fn metrics(&self) -> CircuitMetrics {
        let mut inner = self.inner.write().await;
        self.resolve_timeout(&mut inner);
        let total = inner.counters.total_calls.max(1) as f64;
        CircuitMetrics {
            state: inner.state,
            failures: inner.counters.failures,
            successes: inner.counters.half_open_successes,
            total_calls: inner.counters.total_calls,
            last_failure_time: inner.counters.last_failure_time,
            last_success_time: inner.counters.last_success_time,
            state_changed_at: inner.state_changed_at,
            failure_rate: inner.counters.total_failures as f64 / total,
            success_rate: inner.counters.total_successes as f64 / total,
        }
    }
}
