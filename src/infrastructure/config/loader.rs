//! Configuration loader (§9.3) — a figment layer of programmatic defaults
//! overridden by individual environment variables (the table in spec.md
//! §6 is exhaustive and flat; there is no project `.yaml` layer the way
//! this codebase's own `ConfigLoader` has one).

use anyhow::{Context, Result};
use figment::providers::Serialized;
use figment::Figment;

use crate::domain::error::ConfigError;
use crate::domain::models::{Config, Environment};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the process environment, falling back to
    /// [`Config::default`] for anything unset.
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        figment = Self::merge_bus(figment).context("invalid BUS_* / SCHEMA_REGISTRY_* environment variable")?;
        figment = Self::merge_scheduler(figment).context("invalid SCHEDULER_* environment variable")?;
        figment = Self::merge_recovery(figment).context("invalid RECOVERY_* / CHALLENGE_SERVICE_* environment variable")?;
        figment = Self::merge_app(figment).context("invalid PORT / NODE_ENV / LOG_LEVEL environment variable")?;

        let config: Config = figment.extract().context("failed to extract configuration")?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn merge_bus(figment: Figment) -> Result<Figment, ConfigError> {
        let mut figment = figment;
        if let Some(v) = env_string("BUS_BROKERS") {
            figment = figment.merge(Serialized::default("bus.brokers", v));
        }
        if let Some(v) = env_string("BUS_CLIENT_ID") {
            figment = figment.merge(Serialized::default("bus.client_id", v));
        }
        if let Some(v) = env_bool("BUS_ENABLED")? {
            figment = figment.merge(Serialized::default("bus.enabled", v));
        }
        if let Some(v) = env_bool("BUS_MOCK_MODE")? {
            figment = figment.merge(Serialized::default("bus.mock_mode", v));
        }
        if let Some(v) = env_string("SCHEMA_REGISTRY_URL") {
            figment = figment.merge(Serialized::default("bus.schema_registry_url", Some(v)));
        }
        if let Some(v) = env_string("SCHEMA_REGISTRY_USER") {
            figment = figment.merge(Serialized::default("bus.schema_registry_user", Some(v)));
        }
        if let Some(v) = env_string("SCHEMA_REGISTRY_PASSWORD") {
            figment = figment.merge(Serialized::default("bus.schema_registry_password", Some(v)));
        }
        if let Some(v) = env_u64("BUS_MAX_RETRY_TIME")? {
            figment = figment.merge(Serialized::default("bus.max_retry_time_ms", v));
        }
        if let Some(v) = env_u64("BUS_INITIAL_RETRY_TIME")? {
            figment = figment.merge(Serialized::default("bus.initial_retry_time_ms", v));
        }
        if let Some(v) = env_u32("BUS_RETRIES")? {
            figment = figment.merge(Serialized::default("bus.retries", v));
        }
        Ok(figment)
    }

    fn merge_scheduler(figment: Figment) -> Result<Figment, ConfigError> {
        let mut figment = figment;
        if let Some(v) = env_u64("SCHEDULER_JOB_TIMEOUT")? {
            figment = figment.merge(Serialized::default("scheduler.job_timeout_ms", v));
        }
        if let Some(v) = env_u32("SCHEDULER_MAX_RETRIES")? {
            figment = figment.merge(Serialized::default("scheduler.max_retries", v));
        }
        if let Some(v) = env_u64("SCHEDULER_RETRY_DELAY")? {
            figment = figment.merge(Serialized::default("scheduler.retry_delay_ms", v));
        }
        if let Some(v) = env_usize("SCHEDULER_MAX_CONCURRENT_JOBS")? {
            figment = figment.merge(Serialized::default("scheduler.max_concurrent_jobs", v));
        }
        if let Some(v) = env_i64("SCHEDULER_MIN_SCHEDULE_ADVANCE")? {
            figment = figment.merge(Serialized::default("scheduler.min_schedule_advance_ms", v));
        }
        if let Some(v) = env_i64("SCHEDULER_MAX_SCHEDULE_ADVANCE")? {
            figment = figment.merge(Serialized::default("scheduler.max_schedule_advance_ms", v));
        }
        if let Some(v) = env_bool("SCHEDULER_ALLOW_PAST_SCHEDULING")? {
            figment = figment.merge(Serialized::default("scheduler.allow_past_scheduling", v));
        }
        if let Some(v) = env_usize("SCHEDULER_MAX_JOBS_PER_PROJECT")? {
            figment = figment.merge(Serialized::default("scheduler.max_jobs_per_project", v));
        }
        Ok(figment)
    }

    fn merge_recovery(figment: Figment) -> Result<Figment, ConfigError> {
        let mut figment = figment;
        if let Some(v) = env_bool("RECOVERY_ENABLED")? {
            figment = figment.merge(Serialized::default("recovery.enabled", v));
        }
        if let Some(v) = env_u64("RECOVERY_STARTUP_TIMEOUT")? {
            figment = figment.merge(Serialized::default("recovery.startup_timeout_ms", v));
        }
        if let Some(v) = env_bool("RECOVERY_FAIL_ON_ERROR")? {
            figment = figment.merge(Serialized::default("recovery.fail_on_error", v));
        }
        if let Some(v) = env_usize("RECOVERY_MAX_CONCURRENT_PHASES")? {
            figment = figment.merge(Serialized::default("recovery.max_concurrent_phases", v));
        }
        if let Some(v) = env_bool("RECOVERY_PROCESS_OVERDUE")? {
            figment = figment.merge(Serialized::default("recovery.process_overdue", v));
        }
        if let Some(v) = env_i64("RECOVERY_MAX_PHASE_AGE_HOURS")? {
            figment = figment.merge(Serialized::default("recovery.max_phase_age_hours", v));
        }
        if let Some(v) = env_i64("RECOVERY_MIN_SCHEDULE_GAP")? {
            figment = figment.merge(Serialized::default("recovery.min_schedule_gap_ms", v));
        }
        if let Some(v) = env_string("CHALLENGE_SERVICE_URL") {
            figment = figment.merge(Serialized::default("recovery.challenge_service_url", v));
        }
        if let Some(v) = env_u64("CHALLENGE_SERVICE_TIMEOUT")? {
            figment = figment.merge(Serialized::default("recovery.challenge_service_timeout_ms", v));
        }
        Ok(figment)
    }

    fn merge_app(figment: Figment) -> Result<Figment, ConfigError> {
        let mut figment = figment;
        if let Some(v) = env_u64("PORT")? {
            let port = u16::try_from(v).map_err(|_| ConfigError::Invalid {
                field: "PORT".to_string(),
                reason: "out of u16 range".to_string(),
            })?;
            figment = figment.merge(Serialized::default("app.port", Some(port)));
        }
        if let Some(v) = env_string("NODE_ENV") {
            let environment: Environment = v.parse().map_err(|reason| ConfigError::Invalid {
                field: "NODE_ENV".to_string(),
                reason,
            })?;
            figment = figment.merge(Serialized::default("app.environment", environment));
        }
        if let Some(v) = env_string("LOG_LEVEL") {
            figment = figment.merge(Serialized::default("app.log_level", v));
        }
        Ok(figment)
    }

    /// Validate configuration after loading, matching the existing
    /// `ConfigLoader::validate` structured-error pattern.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.bus.enabled
            && !config.bus.mock_mode
            && config.app.environment == Environment::Production
            && config.bus.broker_list().is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "BUS_BROKERS".to_string(),
                reason: "production requires at least one broker when the bus is enabled and not in mock mode".to_string(),
            });
        }

        if config.scheduler.job_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "SCHEDULER_JOB_TIMEOUT".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if config.recovery.enabled && config.recovery.challenge_service_url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "CHALLENGE_SERVICE_URL".to_string(),
                reason: "required when recovery is enabled".to_string(),
            });
        }

        if config.recovery.max_concurrent_phases == 0 {
            return Err(ConfigError::Invalid {
                field: "RECOVERY_MAX_CONCURRENT_PHASES".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.app.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid {
                field: "LOG_LEVEL".to_string(),
                reason: format!("must be one of {valid_log_levels:?}"),
            });
        }

        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(v) => v.parse::<bool>().map(Some).map_err(|_| ConfigError::Invalid {
            field: key.to_string(),
            reason: format!("expected true/false, got {v:?}"),
        }),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(v) => v.parse::<u64>().map(Some).map_err(|_| ConfigError::Invalid {
            field: key.to_string(),
            reason: format!("expected a non-negative integer, got {v:?}"),
        }),
    }
}

fn env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(v) => v.parse::<u32>().map(Some).map_err(|_| ConfigError::Invalid {
            field: key.to_string(),
            reason: format!("expected a non-negative integer, got {v:?}"),
        }),
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(v) => v.parse::<usize>().map(Some).map_err(|_| ConfigError::Invalid {
            field: key.to_string(),
            reason: format!("expected a non-negative integer, got {v:?}"),
        }),
    }
}

fn env_i64(key: &str) -> Result<Option<i64>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(v) => v.parse::<i64>().map(Some).map_err(|_| ConfigError::Invalid {
            field: key.to_string(),
            reason: format!("expected an integer, got {v:?}"),
        }),
    }
}
