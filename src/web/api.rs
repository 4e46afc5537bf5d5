use crate::checkpoint::CheckpointCoordinator;
use crate::tracker::{lock_state, BatchSummary, CounterSnapshot, PipelineCounters, SharedPartitionState};
use crate::transport::CheckpointHandle;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Read-only handles into the running partition processor
pub struct StatusState {
    pub partition_id: String,
    pub processor_id: String,
    pub start_time: Instant,
    pub counters: Arc<PipelineCounters>,
    pub state: SharedPartitionState,
    pub coordinator: Arc<CheckpointCoordinator>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub partition_id: String,
    pub processor_id: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub in_flight: Vec<BatchSummary>,
    pub counters: CounterSnapshot,
    pub last_checkpoint: Option<CheckpointHandle>,
    pub pending_checkpoints: usize,
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /status
pub async fn get_status(State(status): State<Arc<StatusState>>) -> Json<StatusResponse> {
    let in_flight = lock_state(&status.state).summaries();

    Json(StatusResponse {
        partition_id: status.partition_id.clone(),
        processor_id: status.processor_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: status.start_time.elapsed().as_secs(),
        in_flight,
        counters: status.counters.snapshot(),
        last_checkpoint: status.coordinator.last_persisted(),
        pending_checkpoints: status.coordinator.pending_count(),
    })
}
