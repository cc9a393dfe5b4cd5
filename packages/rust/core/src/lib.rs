//! Batch orchestration for promptbatch.
//!
//! This crate loads prompt files into tasks and runs them through the
//! backend worker pool, enriching and persisting each one along the way.

pub mod dispatch;
pub mod loader;

pub use dispatch::{
    BackendWorker, CompletedTask, DispatchProgress, DispatchSettings, DispatchSummary, Dispatcher,
    SilentDispatchProgress, TaskOutcome, WorkerStats,
};
pub use loader::{load_file, load_tasks};
