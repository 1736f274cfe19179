//! # pf-tuner
//!
//! Auto-tuning scheduler for PatternForge.
//!
//! Queues optimization tasks by priority, runs them on a bounded pool of
//! blocking workers, publishes lifecycle events and summarizes batches as
//! [`TuningReport`]s. One-click and smart (threshold driven) entry points
//! sit on top of the same queue.

mod events;
mod report;
mod task;
mod tuner;

pub use events::TunerEvent;
pub use report::{ReportStatus, TaskOutcome, TuningReport, HIGH_IMPROVEMENT, LOW_IMPROVEMENT, MIN_SUCCESS_RATE};
pub use task::{TaskId, TaskQueue, TaskStatus, TuningTask};
pub use tuner::{AutoTuner, TunerConfig, TunerStatus};
