//! Process configuration, assembled from the environment variables in spec.md §6.

use serde::{Deserialize, Serialize};

fn default_bus_client_id() -> String {
    "autopilot-scheduler".to_string()
}

fn default_true() -> bool {
    true
}

/// `BUS_*` / `SCHEMA_REGISTRY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub brokers: String,
    pub client_id: String,
    pub enabled: bool,
    pub mock_mode: bool,
    pub schema_registry_url: Option<String>,
    pub schema_registry_user: Option<String>,
    pub schema_registry_password: Option<String>,
    pub max_retry_time_ms: u64,
    pub initial_retry_time_ms: u64,
    pub retries: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            client_id: default_bus_client_id(),
            enabled: true,
            mock_mode: false,
            schema_registry_url: None,
            schema_registry_user: None,
            schema_registry_password: None,
            max_retry_time_ms: 30_000,
            initial_retry_time_ms: 300,
            retries: 5,
        }
    }
}

impl BusConfig {
    pub fn broker_list(&self) -> Vec<&str> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// `SCHEDULER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub job_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_concurrent_jobs: usize,
    pub min_schedule_advance_ms: i64,
    pub max_schedule_advance_ms: i64,
    pub allow_past_scheduling: bool,
    pub max_jobs_per_project: usize,
    /// Grace window terminal jobs are retained for (invariant I3). Default 5 min.
    pub retention_window_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_concurrent_jobs: 1000,
            min_schedule_advance_ms: 0,
            max_schedule_advance_ms: i64::MAX,
            allow_past_scheduling: false,
            max_jobs_per_project: 10_000,
            retention_window_ms: 5 * 60 * 1000,
        }
    }
}

/// `RECOVERY_*` / `CHALLENGE_SERVICE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub startup_timeout_ms: u64,
    pub fail_on_error: bool,
    pub max_concurrent_phases: usize,
    pub process_overdue: bool,
    pub max_phase_age_hours: i64,
    pub min_schedule_gap_ms: i64,
    pub challenge_service_url: String,
    pub challenge_service_timeout_ms: u64,
    pub min_project_id: u64,
    pub max_project_id: u64,
    pub skip_invalid_phases: bool,
    /// `projectStatus` values a phase must carry to be recovered (spec.md
    /// §4.3 step 2: "`projectStatus ∈ {ACTIVE, DRAFT}` (configurable)").
    pub allowed_project_statuses: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_timeout_ms: 60_000,
            fail_on_error: false,
            max_concurrent_phases: 10,
            process_overdue: true,
            max_phase_age_hours: 72,
            min_schedule_gap_ms: 1_000,
            challenge_service_url: "http://localhost:3000".to_string(),
            challenge_service_timeout_ms: 30_000,
            min_project_id: 1,
            max_project_id: u64::MAX,
            skip_invalid_phases: true,
            allowed_project_statuses: vec!["ACTIVE".to_string(), "DRAFT".to_string()],
        }
    }
}

/// `PORT` / `NODE_ENV` / `LOG_LEVEL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: Option<u16>,
    pub environment: Environment,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: None,
            environment: Environment::Development,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
    pub app: AppConfig,
    #[serde(default = "default_true")]
    pub health_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            scheduler: SchedulerConfig::default(),
            recovery: RecoveryConfig::default(),
            app: AppConfig::default(),
            health_enabled: default_true(),
        }
    }
}
