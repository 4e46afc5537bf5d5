use crate::storage::CheckpointStore;
use crate::tracker::counters::{bump, PipelineCounters};
use crate::tracker::state::{lock_state, SharedPartitionState};
use crate::transport::CheckpointHandle;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

/// Result of one `try_advance` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// This handle was written to the store. It may belong to an earlier,
    /// previously deferred candidate rather than the one just offered.
    Persisted(CheckpointHandle),
    /// An earlier scan is still in flight; the candidate stays pending
    Deferred,
    /// The candidate is not past the last issued checkpoint
    Superseded,
    /// The store rejected the write; the candidate stays pending
    Failed,
}

#[derive(Debug, Clone)]
struct Candidate {
    handle: CheckpointHandle,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Progress {
    pending: Vec<Candidate>,
    /// Highest handle handed to the store
    issued: Option<CheckpointHandle>,
    /// Highest handle the store confirmed
    persisted: Option<CheckpointHandle>,
    /// Scans created at or after this instant were dropped without being
    /// handled and must be replayed
    hold_back: Option<DateTime<Utc>>,
}

/// Decides when the partition checkpoint may move.
///
/// A candidate is safe once no in-flight batch was created at or before it.
/// `created_at` stands in for log position, so advancing never skips past an
/// earlier scan that is still being assembled.
pub struct CheckpointCoordinator {
    state: SharedPartitionState,
    store: Arc<dyn CheckpointStore>,
    counters: Arc<PipelineCounters>,
    progress: Mutex<Progress>,
}

impl CheckpointCoordinator {
    pub fn new(
        state: SharedPartitionState,
        store: Arc<dyn CheckpointStore>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            state,
            store,
            counters,
            progress: Mutex::new(Progress::default()),
        }
    }

    /// Seed with the checkpoint loaded at start-up
    pub fn with_last_persisted(self, handle: Option<CheckpointHandle>) -> Self {
        {
            let mut progress = self.lock_progress();
            progress.issued = handle.clone();
            progress.persisted = handle;
        }
        self
    }

    pub fn last_persisted(&self) -> Option<CheckpointHandle> {
        self.lock_progress().persisted.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_progress().pending.len()
    }

    /// Never advance past scans created at or after `created_at`.
    /// Used when a completed scan could not be handed to the sink.
    pub fn hold_back(&self, created_at: DateTime<Utc>) {
        let mut progress = self.lock_progress();
        progress.hold_back = Some(match progress.hold_back {
            Some(existing) => existing.min(created_at),
            None => created_at,
        });
    }

    /// Offer a checkpoint candidate and persist the newest safe one.
    ///
    /// Store failures are logged and swallowed; the candidate is retried on
    /// the next call.
    pub async fn try_advance(
        &self,
        handle: CheckpointHandle,
        created_at: DateTime<Utc>,
    ) -> AdvanceOutcome {
        let (chosen, previous, superseded) = {
            let state = lock_state(&self.state);
            let mut progress = self.lock_progress();

            let superseded = progress
                .issued
                .as_ref()
                .is_some_and(|last| !handle.is_after(last));
            if superseded {
                debug!(checkpoint = %handle, "Checkpoint candidate already covered");
            } else {
                progress.pending.push(Candidate { handle, created_at });
            }

            if let Some(last) = progress.issued.clone() {
                progress.pending.retain(|c| c.handle.is_after(&last));
            }

            let oldest = state.oldest_created_at();
            let hold_back = progress.hold_back;
            let is_safe = |c: &Candidate| {
                oldest.map_or(true, |o| c.created_at < o)
                    && hold_back.map_or(true, |h| c.created_at < h)
            };

            let best = progress
                .pending
                .iter()
                .filter(|c| is_safe(*c))
                .max_by_key(|c| (c.created_at, c.handle.sequence_number))
                .cloned();

            let Some(best) = best else {
                if !superseded {
                    debug!(
                        pending = progress.pending.len(),
                        oldest_in_flight = ?oldest,
                        "Checkpoint deferred behind in-flight scan"
                    );
                }
                return if superseded {
                    AdvanceOutcome::Superseded
                } else {
                    AdvanceOutcome::Deferred
                };
            };

            progress.pending.retain(|c| c.handle.is_after(&best.handle));
            let previous = progress.issued.replace(best.handle.clone());
            (best, previous, superseded)
        };

        match self.store.save_checkpoint(&chosen.handle).await {
            Ok(()) => {
                bump(&self.counters.checkpoints_persisted);
                let mut progress = self.lock_progress();
                let newer = progress
                    .persisted
                    .as_ref()
                    .map_or(true, |p| chosen.handle.is_after(p));
                if newer {
                    progress.persisted = Some(chosen.handle.clone());
                }
                info!(
                    partition_id = %chosen.handle.partition_id,
                    sequence_number = chosen.handle.sequence_number,
                    offset = chosen.handle.offset,
                    "Checkpoint advanced"
                );
                AdvanceOutcome::Persisted(chosen.handle)
            }
            Err(e) => {
                bump(&self.counters.checkpoint_failures);
                error!(checkpoint = %chosen.handle, error = %e, "Failed to persist checkpoint");

                let mut progress = self.lock_progress();
                if progress.issued.as_ref() == Some(&chosen.handle) {
                    progress.issued = previous;
                    progress.pending.push(chosen);
                }
                if superseded {
                    AdvanceOutcome::Superseded
                } else {
                    AdvanceOutcome::Failed
                }
            }
        }
    }

    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
