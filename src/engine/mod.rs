//! Core engine: per-stream prediction cycles and their scheduling.

pub mod cycle;
pub mod scheduler;
pub mod status;

pub use cycle::{AbortReason, CycleOutcome, CycleParams, StreamWorker};
pub use scheduler::{retrain_all, RetrainPolicy, Scheduler, SchedulerHandle};
pub use status::{CycleStage, StatusBoard, StreamStatus};
