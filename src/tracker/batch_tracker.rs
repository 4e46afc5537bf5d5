use super::batch::{Applied, Batch};
use super::clock::Clock;
use super::completion::is_complete;
use super::counters::{bump, PipelineCounters};
use super::state::{lock_state, SharedPartitionState};
use crate::checkpoint::CheckpointCoordinator;
use crate::event::DiscoveryEvent;
use crate::sink::ScanSink;
use crate::transport::CheckpointHandle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Folded into an in-flight batch
    Buffered,
    /// Already seen for this scan
    Duplicate,
    /// Completed its scan, which was handed to the sink
    Completed,
    /// Completed its scan but shutdown interrupted the sink call
    Cancelled,
}

/// Applies events to the partition state and dispatches completed scans
pub struct BatchTracker {
    state: SharedPartitionState,
    sink: Arc<dyn ScanSink>,
    coordinator: Arc<CheckpointCoordinator>,
    clock: Arc<dyn Clock>,
    counters: Arc<PipelineCounters>,
    deduplicate: bool,
}

impl BatchTracker {
    pub fn new(
        state: SharedPartitionState,
        sink: Arc<dyn ScanSink>,
        coordinator: Arc<CheckpointCoordinator>,
        clock: Arc<dyn Clock>,
        counters: Arc<PipelineCounters>,
        deduplicate: bool,
    ) -> Self {
        Self {
            state,
            sink,
            coordinator,
            clock,
            counters,
            deduplicate,
        }
    }

    pub fn state(&self) -> &SharedPartitionState {
        &self.state
    }

    /// Apply one event; on completion call the sink, then offer the
    /// batch's checkpoint.
    ///
    /// The completed batch leaves the partition state before the lock is
    /// released, so the sink and the checkpoint store run unlocked. A sink
    /// failure is logged and counted, and the checkpoint still advances.
    pub async fn add_event(
        &self,
        agent_id: &str,
        event: DiscoveryEvent,
        handle: CheckpointHandle,
        cancel: &CancellationToken,
    ) -> EventOutcome {
        let scan_timestamp = event.scan_timestamp;
        let index = event.index;

        let batch = {
            let mut state = lock_state(&self.state);
            let now = self.clock.now();
            let batch = state.get_or_insert_with(agent_id, scan_timestamp, || {
                Batch::new(agent_id, scan_timestamp, now, handle)
            });

            if batch.apply(event, self.deduplicate) == Applied::Duplicate {
                bump(&self.counters.duplicates);
                debug!(
                    agent_id = %agent_id,
                    scan_timestamp = %scan_timestamp,
                    index,
                    "Duplicate discovery event ignored"
                );
                return EventOutcome::Duplicate;
            }

            if !is_complete(batch) {
                trace!(
                    agent_id = %agent_id,
                    scan_timestamp = %scan_timestamp,
                    index,
                    endpoints = batch.endpoint_count(),
                    max_index_seen = batch.max_index_seen,
                    saw_sentinel = batch.saw_sentinel,
                    "Discovery event buffered"
                );
                return EventOutcome::Buffered;
            }

            match state.remove(agent_id, scan_timestamp) {
                Some(batch) => batch,
                None => return EventOutcome::Buffered,
            }
        };

        let created_at = batch.created_at;
        let checkpoint = batch.checkpoint_handle.clone();
        let scan = batch.into_completed_scan();
        bump(&self.counters.completed);
        info!(
            agent_id = %scan.agent_id,
            scan_timestamp = %scan.scan_timestamp,
            endpoints = scan.endpoints.len(),
            "Discovery scan complete"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.sink.process_completed_scan(&scan) => Some(result),
        };

        match result {
            None => {
                self.coordinator.hold_back(created_at);
                warn!(
                    agent_id = %scan.agent_id,
                    scan_timestamp = %scan.scan_timestamp,
                    checkpoint = %checkpoint,
                    "Shutdown interrupted scan dispatch, scan will be replayed"
                );
                return EventOutcome::Cancelled;
            }
            Some(Err(e)) => {
                bump(&self.counters.sink_failures);
                error!(
                    agent_id = %scan.agent_id,
                    scan_timestamp = %scan.scan_timestamp,
                    error = %e,
                    "Failed to process completed scan"
                );
            }
            Some(Ok(())) => {}
        }

        self.coordinator.try_advance(checkpoint, created_at).await;
        EventOutcome::Completed
    }
}
