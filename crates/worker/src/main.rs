mod config;
mod consumer;
mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fitline_events::{EventBus, EventLogger};
use fitline_inference::InferenceEndpoints;
use fitline_pipeline::{Collaborators, Orchestrator, PgJobStore, PipelineConfig, QueueDispatcher};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::WorkerConfig;
use consumer::TaskConsumer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fitline_worker=debug,fitline_pipeline=debug,fitline_events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let pipeline_config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let endpoints = InferenceEndpoints::from_env().context("Invalid inference endpoints")?;
    tracing::info!(
        worker_id = %config.worker_id,
        concurrency = config.concurrency,
        "Loaded worker configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = fitline_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    fitline_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    fitline_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Event bus ---
    let cancel = CancellationToken::new();
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe(), cancel.clone()));

    // --- Orchestrator ---
    let collaborators = Collaborators::http(endpoints).context("Failed to build inference client")?;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(QueueDispatcher::new(pool.clone())),
        collaborators,
        pipeline_config,
        Arc::clone(&event_bus),
    ));

    // --- Consumers and watchdog ---
    let consumer = Arc::new(TaskConsumer::new(
        pool,
        Arc::clone(&orchestrator),
        config.clone(),
    ));
    let mut handles = Vec::with_capacity(config.concurrency + 1);
    for slot in 0..config.concurrency {
        handles.push(tokio::spawn(Arc::clone(&consumer).run(slot, cancel.clone())));
    }
    handles.push(tokio::spawn(watchdog::run(
        orchestrator,
        Duration::from_secs(config.stall_threshold_secs),
        Duration::from_secs(config.watchdog_interval_secs),
        config.watchdog_batch_size,
        cancel.clone(),
    )));
    tracing::info!("Worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    for handle in handles {
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("Worker loop did not stop within the shutdown timeout");
        }
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
