use super::clock::Clock;
use super::counters::{bump, PipelineCounters};
use super::state::{lock_state, SharedPartitionState};
use crate::checkpoint::{AdvanceOutcome, CheckpointCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: usize,
    pub advance: Option<AdvanceOutcome>,
}

/// Evicts batches that have been in flight longer than the inactivity
/// threshold, measured from batch creation. Evicted batches are never
/// dispatched.
pub struct StaleBatchReaper {
    state: SharedPartitionState,
    coordinator: Arc<CheckpointCoordinator>,
    clock: Arc<dyn Clock>,
    counters: Arc<PipelineCounters>,
    inactivity_threshold: Duration,
}

impl StaleBatchReaper {
    pub fn new(
        state: SharedPartitionState,
        coordinator: Arc<CheckpointCoordinator>,
        clock: Arc<dyn Clock>,
        counters: Arc<PipelineCounters>,
        inactivity_threshold: Duration,
    ) -> Self {
        Self {
            state,
            coordinator,
            clock,
            counters,
            inactivity_threshold,
        }
    }

    pub async fn run_once(&self) -> ReapReport {
        // An unrepresentable threshold means nothing can ever be stale
        let cutoff = chrono::Duration::from_std(self.inactivity_threshold)
            .ok()
            .and_then(|threshold| self.clock.now().checked_sub_signed(threshold));
        let Some(cutoff) = cutoff else {
            return ReapReport::default();
        };

        let evicted = lock_state(&self.state).evict_created_before(cutoff);
        if evicted.is_empty() {
            return ReapReport::default();
        }

        for batch in &evicted {
            bump(&self.counters.reaped);
            warn!(
                agent_id = %batch.agent_id,
                scan_timestamp = %batch.scan_timestamp,
                created_at = %batch.created_at,
                endpoints = batch.endpoint_count(),
                max_index_seen = batch.max_index_seen,
                saw_sentinel = batch.saw_sentinel,
                "Abandoning stale discovery scan"
            );
        }

        let newest = evicted
            .iter()
            .max_by_key(|b| (b.created_at, b.checkpoint_handle.sequence_number));

        let advance = match newest {
            Some(batch) => Some(
                self.coordinator
                    .try_advance(batch.checkpoint_handle.clone(), batch.created_at)
                    .await,
            ),
            None => None,
        };

        ReapReport {
            evicted: evicted.len(),
            advance,
        }
    }
}
