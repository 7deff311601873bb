// Task Scheduler Module - in-process priority scheduling of background work
//
// This module provides the task side of the crate:
// - Bounded priority queue with FIFO ordering inside a priority band
// - Fixed worker pool with per-attempt timeout and retry with backoff
// - Cooperative cancellation observed at attempt boundaries
// - Structured logging with correlation IDs
// - Graceful shutdown with multiple phases
// - Registry-based task lookup, history and statistics

pub mod types;
pub mod logging;
pub mod metrics;
pub mod config;
pub mod error;
pub mod retry;
pub mod handle;
pub mod context;
pub mod spec;
pub mod queue;
pub mod registry;
mod notify;
mod worker;
pub mod manager;

// Re-export commonly used types for convenience
pub use types::{
    BoxError, CompletionCallback, FailureKind, ProgressCallback, SchedulerStats, ShutdownPhase,
    TaskFunction, TaskId, TaskKind, TaskOutcome, TaskPriority, TaskProgress, TaskResult,
    TaskStatus,
};

pub use logging::{CorrelationId, TaskLoggingContext};
pub use metrics::WorkerStats;
pub use config::{SchedulerConfig, ShutdownConfig, ShutdownStatus};
pub use error::SchedulerError;
pub use retry::RetryPolicy;
pub use handle::{CancelDisposition, TaskError, TaskRecord, TaskSnapshot};
pub use context::{ProgressReporter, TaskContext};
pub use spec::TaskSpec;
pub use queue::PriorityWorkQueue;
pub use registry::TaskRegistry;
pub use notify::SCHEDULER_SOURCE;
pub use manager::TaskScheduler;

// Convenience type aliases
pub type DefaultTaskScheduler = TaskScheduler<()>;
pub type JsonTaskScheduler = TaskScheduler<serde_json::Value>;

#[cfg(test)]
mod tests;
