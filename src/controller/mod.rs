pub mod checkpoint;
pub mod output;
pub mod processor;
pub mod scheduler;

pub use checkpoint::{Checkpoint, CheckpointManager, CHECKPOINT_FORMAT_VERSION};
pub use output::{write_outputs, RunSummary};
pub use processor::{ProcessedWindow, WindowResultProcessor};
pub use scheduler::{RollingHorizonScheduler, RunReport, SchedulerPhase};
