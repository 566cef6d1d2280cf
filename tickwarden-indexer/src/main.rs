//! Tickwarden Indexer Entry Point
//!
//! Bootstraps telemetry and configuration, prepares the coordination schema,
//! resolves the run's sampling interval and runs `TICKWARDEN_WORKERS`
//! scheduling loops against a local batch directory until Ctrl-C.

use std::sync::Arc;

use tickwarden_core::{ConfigError, CoordResult, CoordinatorConfig};
use tickwarden_indexer::constants::{DEFAULT_BATCH_DIR, DEFAULT_WORKERS};
use tickwarden_indexer::telemetry::{init_tracing, serve_metrics, TelemetryConfig};
use tickwarden_indexer::{
    DbClient, DbConfig, JsonLinesTickIndexer, PgSamplingIntervalProvider, SchedulingLoop,
};
use tickwarden_storage::{
    BatchSource, CoordinationStore, FixedSamplingInterval, LocalDirBatchSource,
    SamplingIntervalProvider,
};
use tokio::sync::watch;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let telemetry_config = TelemetryConfig::from_env()?;
    init_tracing(&telemetry_config)?;

    let config = match std::env::var("TICKWARDEN_CONFIG") {
        Ok(path) => CoordinatorConfig::from_toml_file(path)?,
        Err(_) => CoordinatorConfig::from_env()?,
    };

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;
    db.ensure_schema().await?;

    let sampling_interval = resolve_sampling_interval(&db).await?;
    let workers = parse_env("TICKWARDEN_WORKERS", DEFAULT_WORKERS)?;
    let batch_dir =
        std::env::var("TICKWARDEN_BATCH_DIR").unwrap_or_else(|_| DEFAULT_BATCH_DIR.to_string());

    let indexer = Arc::new(JsonLinesTickIndexer::new(config.consumer_class.clone(), db.clone()));
    indexer.ensure_table().await?;

    let store: Arc<dyn CoordinationStore> = Arc::new(db.clone());
    let source: Arc<dyn BatchSource> = Arc::new(LocalDirBatchSource::new(&batch_dir));

    tracing::info!(
        consumer_class = %config.consumer_class,
        sampling_interval,
        workers,
        batch_dir = %batch_dir,
        ticks_table = %indexer.table(),
        "Starting tickwarden indexer"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_task = telemetry_config
        .metrics_addr
        .map(|addr| tokio::spawn(serve_metrics(addr, shutdown_rx.clone())));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let worker = SchedulingLoop::new(
            config.clone(),
            sampling_interval,
            store.clone(),
            source.clone(),
            indexer.clone(),
            shutdown_rx.clone(),
        )?;
        let worker_id = worker.worker_id().to_string();
        handles.push((worker_id, tokio::spawn(worker.run())));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let mut failed = false;
    for (worker_id, handle) in handles {
        match handle.await {
            Ok(Ok(stats)) => tracing::info!(
                worker_id = %worker_id,
                batches_completed = stats.batches_completed,
                batches_failed = stats.batches_failed,
                gaps_recorded = stats.gaps_recorded,
                gaps_permanent = stats.gaps_permanent,
                "Worker finished"
            ),
            Ok(Err(e)) => {
                failed = true;
                tracing::error!(worker_id = %worker_id, error = %e, "Worker failed");
            }
            Err(e) => {
                failed = true;
                tracing::error!(worker_id = %worker_id, error = %e, "Worker panicked");
            }
        }
    }

    if let Some(task) = metrics_task {
        if let Ok(Err(e)) = task.await {
            tracing::warn!(error = %e, "Metrics server exited with error");
        }
    }

    if failed {
        return Err("one or more workers failed".into());
    }
    Ok(())
}

/// `TICKWARDEN_SAMPLING_INTERVAL` overrides the run metadata table.
async fn resolve_sampling_interval(db: &DbClient) -> CoordResult<i64> {
    let provider: Box<dyn SamplingIntervalProvider> =
        match std::env::var("TICKWARDEN_SAMPLING_INTERVAL") {
            Ok(raw) => {
                let interval = raw.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                    field: "sampling_interval".to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                Box::new(FixedSamplingInterval(interval))
            }
            Err(_) => Box::new(PgSamplingIntervalProvider::new(db.clone())),
        };

    provider.sampling_interval().await?.ok_or_else(|| {
        ConfigError::MissingRequired {
            field: "sampling_interval".to_string(),
        }
        .into()
    })
}

fn parse_env(key: &str, default: usize) -> CoordResult<usize> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<usize>().map_err(|e| {
            ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}
