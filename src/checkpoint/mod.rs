pub mod coordinator;

pub use coordinator::{AdvanceOutcome, CheckpointCoordinator};
