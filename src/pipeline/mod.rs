pub mod resume;
pub mod runner;

pub use resume::resume_checkpoint;
pub use runner::run_partition;
