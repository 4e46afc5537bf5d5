use crate::checkpoint::CheckpointCoordinator;
use crate::config::parse::{load_config, ConfigError};
use crate::config::types::Config;
use crate::intake::EventIntake;
use crate::pipeline::{resume_checkpoint, run_partition};
use crate::sink::{build_sink, SinkError};
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::{CheckpointStore, StorageError};
use crate::tracker::{
    BatchTracker, Clock, PartitionState, PipelineCounters, StaleBatchReaper, SystemClock,
};
use crate::transport::{FilePartitionSource, PartitionContext};
use crate::web::{run_server, StatusState};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config not found; use --config <path> or run 'scanfold config init'")]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("invalid listen address: {0}")]
    ListenAddr(#[from] std::net::AddrParseError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let Some(config_path) = config_path else {
        eprintln!("Error: config not found");
        eprintln!("Searched locations:");
        eprintln!("  ~/.config/scanfold/config.yml");
        eprintln!("  /etc/scanfold/config.yml");
        return Err(RunError::ConfigNotFound);
    };

    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(&config_path)?;
    run_with_config(&config_path, config).await
}

async fn run_with_config(config_path: &Path, config: Config) -> Result<(), RunError> {
    let owner = config.storage.owner.clone().unwrap_or_else(default_owner);

    info!(path = %config.storage.path.display(), owner = %owner, "Initializing storage");
    let storage = Arc::new(DuckDbStorage::new(&config.storage.path, owner.clone())?);
    storage.init_schema().await?;

    let resume = storage.load_checkpoint(&config.partition.id).await?;
    match &resume {
        Some(checkpoint) => info!(
            checkpoint = %checkpoint.handle,
            previous_owner = %checkpoint.owner,
            updated_at = %checkpoint.updated_at,
            "Resuming from checkpoint"
        ),
        None => info!(
            partition_id = %config.partition.id,
            start = ?config.partition.start,
            "No checkpoint stored, starting from configured position"
        ),
    }
    let stored = resume.map(|checkpoint| checkpoint.handle);
    let mut source = FilePartitionSource::new(&config.partition).resume_from(stored.clone());
    let resume = resume_checkpoint(&mut source, &storage, stored).await?;

    let state = PartitionState::shared();
    let counters = Arc::new(PipelineCounters::default());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let coordinator = Arc::new(
        CheckpointCoordinator::new(state.clone(), storage.clone(), counters.clone())
            .with_last_persisted(resume),
    );
    let sink = build_sink(&config.sink, storage.clone())?;
    let tracker = Arc::new(BatchTracker::new(
        state.clone(),
        sink,
        coordinator.clone(),
        clock.clone(),
        counters.clone(),
        config.tracking.deduplicate,
    ));
    let reaper = Arc::new(StaleBatchReaper::new(
        state.clone(),
        coordinator.clone(),
        clock,
        counters.clone(),
        config.reaper.inactivity_threshold,
    ));
    let intake = EventIntake::new(config.intake.clone(), tracker, reaper, counters.clone());

    let context = PartitionContext {
        partition_id: config.partition.id.clone(),
        owner: owner.clone(),
    };

    let shutdown = CancellationToken::new();

    let web_handle = match &config.web {
        Some(web) => {
            let listen: SocketAddr = web.listen.parse()?;
            let status = Arc::new(StatusState {
                partition_id: config.partition.id.clone(),
                processor_id: owner.clone(),
                start_time: Instant::now(),
                counters: counters.clone(),
                state: state.clone(),
                coordinator: coordinator.clone(),
            });
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_server(listen, status, token).await {
                    error!(error = %e, "Status server failed");
                }
            }))
        }
        None => None,
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Could not listen for shutdown signal"),
        }
    });

    info!(
        config_path = %config_path.display(),
        partition_id = %config.partition.id,
        path = %config.partition.path.display(),
        sink = ?config.sink,
        "Scanfold started"
    );

    let reason = run_partition(
        &mut source,
        &intake,
        &context,
        &config.partition,
        &config.reaper,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Some(handle) = web_handle {
        handle.await?;
    }

    let summary = counters.snapshot();
    info!(
        reason = %reason,
        completed = summary.completed,
        reaped = summary.reaped,
        checkpoint = ?coordinator.last_persisted(),
        "Scanfold stopped"
    );
    Ok(())
}

/// Hostname, or a random id when the hostname is unavailable
fn default_owner() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| format!("scanfold-{}", uuid::Uuid::new_v4()))
}
