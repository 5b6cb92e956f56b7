//! Process entry point: loads configuration, wires the scheduler core to
//! its adapters leaf-first, and runs until `SIGTERM`/`SIGINT`.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use autopilot_scheduler::domain::models::Environment;
use autopilot_scheduler::infrastructure::bus::{probe_connectivity, BusClient, MockBusClient, RealBusClient};
use autopilot_scheduler::infrastructure::config::ConfigLoader;
use autopilot_scheduler::infrastructure::health::{self, HealthState};
use autopilot_scheduler::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, RotationPolicy};
use autopilot_scheduler::infrastructure::HttpChallengeClient;
use autopilot_scheduler::services::job_registry::JobRegistryConfig;
use autopilot_scheduler::services::{BusEgressProducer, IngressRouter, JobRegistry, RecoveryOrchestrator};
use chrono::Duration as ChronoDuration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let log_config = build_log_config();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fatal startup or shutdown error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    info!(environment = ?config.app.environment, "configuration loaded");

    let bus_client: Arc<dyn BusClient> = if !config.bus.enabled || config.bus.mock_mode {
        info!("bus disabled or mock mode requested, using mock bus client");
        MockBusClient::new()
    } else {
        let brokers = config.bus.broker_list();
        if probe_connectivity(&brokers).await {
            info!(brokers = ?brokers, "bus connectivity probe succeeded");
            RealBusClient::new(brokers[0].to_string(), config.bus.client_id.clone())
        } else if config.app.environment == Environment::Production {
            anyhow::bail!("bus connectivity probe failed in production; refusing to start with a mock bus");
        } else {
            warn!("bus connectivity probe failed outside production, falling back to mock bus client");
            MockBusClient::new()
        }
    };
    let bus_enabled = config.bus.enabled;

    let producer = BusEgressProducer::new(bus_client.clone(), &config.bus);

    let registry_config = JobRegistryConfig {
        retention_window: ChronoDuration::milliseconds(config.scheduler.retention_window_ms),
        ..JobRegistryConfig::default()
    };
    let registry = JobRegistry::new(producer.clone(), registry_config);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let timer_handle = registry.start(shutdown_tx.subscribe());
    let reaper_handle = registry.start_reaper(shutdown_tx.subscribe());

    let challenge_client = Arc::new(
        HttpChallengeClient::new(config.recovery.challenge_service_url.clone(), config.recovery.challenge_service_timeout_ms)
            .context("failed to build challenge-service HTTP client")?,
    );
    let recovery = RecoveryOrchestrator::new(challenge_client, registry.clone(), producer.clone(), config.recovery.clone());

    match recovery.execute_startup_recovery().await {
        Ok(outcome) => info!(
            scheduled = outcome.scheduled_count,
            overdue_published = outcome.overdue_published_count,
            skipped = outcome.skipped_count,
            errors = outcome.errors.len(),
            "startup recovery completed"
        ),
        Err(err) if config.recovery.fail_on_error => {
            anyhow::bail!("startup recovery failed and RECOVERY_FAIL_ON_ERROR=true: {err}");
        }
        Err(err) => {
            warn!(error = %err, "startup recovery failed, continuing with an empty registry");
        }
    }

    // The event-bus client library (topic subscription, offset management,
    // Confluent-frame stripping) is an external collaborator out of scope
    // here (spec.md §1); a real deployment's consumer loop decodes each
    // message and calls `ingress.handle_raw(topic, &bytes)`.
    let _ingress = Arc::new(IngressRouter::new(registry.clone(), producer.clone()));

    let health_handle = config.app.port.map(|port| {
        let state = HealthState { registry: registry.clone(), recovery: recovery.clone(), bus_client: bus_client.clone(), bus_enabled };
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(err) = health::serve(state, port, shutdown_rx).await {
                error!(error = %err, "health endpoint terminated with an error");
            }
        })
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");

    let _ = shutdown_tx.send(());

    let drain = async {
        let _ = timer_handle.await;
        let _ = reaper_handle.await;
        if let Some(handle) = health_handle {
            let _ = handle.await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        anyhow::bail!("shutdown did not complete within {SHUTDOWN_GRACE:?}");
    }

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn build_log_config() -> LogConfig {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    let log_dir = std::env::var("LOG_DIR").ok().map(std::path::PathBuf::from);
    let rotation = match std::env::var("LOG_ROTATION").as_deref() {
        Ok("hourly") => RotationPolicy::Hourly,
        Ok("never") => RotationPolicy::Never,
        _ => RotationPolicy::Daily,
    };

    LogConfig { level, format, log_dir, rotation }
}
