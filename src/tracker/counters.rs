use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one partition processor
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub foreign: AtomicU64,
    pub missing_identity: AtomicU64,
    pub poison: AtomicU64,
    pub duplicates: AtomicU64,
    pub completed: AtomicU64,
    pub sink_failures: AtomicU64,
    pub reaped: AtomicU64,
    pub checkpoints_persisted: AtomicU64,
    pub checkpoint_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub applied: u64,
    pub foreign: u64,
    pub missing_identity: u64,
    pub poison: u64,
    pub duplicates: u64,
    pub completed: u64,
    pub sink_failures: u64,
    pub reaped: u64,
    pub checkpoints_persisted: u64,
    pub checkpoint_failures: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            received: load(&self.received),
            applied: load(&self.applied),
            foreign: load(&self.foreign),
            missing_identity: load(&self.missing_identity),
            poison: load(&self.poison),
            duplicates: load(&self.duplicates),
            completed: load(&self.completed),
            sink_failures: load(&self.sink_failures),
            reaped: load(&self.reaped),
            checkpoints_persisted: load(&self.checkpoints_persisted),
            checkpoint_failures: load(&self.checkpoint_failures),
        }
    }
}
