pub mod batch;
pub mod batch_tracker;
pub mod clock;
pub mod completion;
pub mod counters;
pub mod reaper;
pub mod state;

pub use batch::{Applied, Batch};
pub use batch_tracker::{BatchTracker, EventOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::is_complete;
pub use counters::{CounterSnapshot, PipelineCounters};
pub use reaper::{ReapReport, StaleBatchReaper};
pub use state::{lock_state, BatchSummary, PartitionState, SharedPartitionState};
