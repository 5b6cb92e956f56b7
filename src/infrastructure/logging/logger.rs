//! `tracing` subscriber wiring (§9.1), modeled on this codebase's existing
//! logging module: an `EnvFilter` built from the configured level, a JSON or
//! pretty stdout layer, and an optional rotating file layer.

use anyhow::{Context, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::config::{LogConfig, LogFormat, RotationPolicy};

/// Holds the non-blocking writer guard alive for the process lifetime.
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    pub fn init(config: &LogConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

        if let Some(ref log_dir) = config.log_dir {
            let file_appender = match config.rotation {
                RotationPolicy::Daily => rolling::daily(log_dir, "autopilot-scheduler.log"),
                RotationPolicy::Hourly => rolling::hourly(log_dir, "autopilot-scheduler.log"),
                RotationPolicy::Never => rolling::never(log_dir, "autopilot-scheduler.log"),
            };
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true);

            match config.format {
                LogFormat::Json => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_current_span(true);
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(file_layer)
                        .with(stdout_layer)
                        .try_init()
                        .context("failed to install tracing subscriber")?;
                }
                LogFormat::Pretty => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE);
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(file_layer)
                        .with(stdout_layer)
                        .try_init()
                        .context("failed to install tracing subscriber")?;
                }
            }
            return Ok(Self { _guard: Some(guard) });
        }

        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_current_span(true);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .try_init()
                    .context("failed to install tracing subscriber")?;
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .try_init()
                    .context("failed to install tracing subscriber")?;
            }
        }

        Ok(Self { _guard: None })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    level.parse::<Level>().map_err(|_| anyhow::anyhow!("invalid log level: {level}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_log_level("not-a-level").is_err());
    }

    #[test]
    fn accepts_known_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(parse_log_level(level).is_ok());
        }
    }
}
