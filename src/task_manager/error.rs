use thiserror::Error;

/// Errors surfaced synchronously by the scheduler API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The work queue is at `max_queue_size`; the task was never created
    #[error("task queue is full (capacity {capacity})")]
    Capacity { capacity: usize },

    /// Submission attempted while the scheduler is stopped or shutting down
    #[error("task scheduler is not running")]
    NotRunning,

    #[error("task scheduler has already been started")]
    AlreadyStarted,
}
