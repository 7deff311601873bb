use crate::task_manager::retry::RetryPolicy;
use crate::task_manager::types::ShutdownPhase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Deadlines of the two waiting phases of `TaskScheduler::shutdown`
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Timeout for letting queued and running tasks finish on their own
    pub graceful_timeout: Duration,
    /// Timeout for the force termination phase
    pub force_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(30),
            force_timeout: Duration::from_secs(5),
        }
    }
}

/// Where a scheduler is in its shutdown sequence. Returned by `shutdown()` and
/// readable at any time through `shutdown_status()`.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownStatus {
    pub phase: ShutdownPhase,
    pub shutdown_started_at: Option<DateTime<Utc>>,
    pub phase_started_at: Option<DateTime<Utc>>,
    /// Number of tasks not yet terminal
    pub tasks_remaining: usize,
    /// Number of active tasks when shutdown started
    pub initial_task_count: usize,
    /// Number of tasks cancelled by the force phase
    pub tasks_cancelled: usize,
    /// Whether every task finished before the graceful timeout
    pub completed_gracefully: bool,
}

impl ShutdownStatus {
    pub fn new() -> Self {
        Self {
            phase: ShutdownPhase::Running,
            shutdown_started_at: None,
            phase_started_at: None,
            tasks_remaining: 0,
            initial_task_count: 0,
            tasks_cancelled: 0,
            completed_gracefully: false,
        }
    }

    pub fn shutdown_elapsed(&self) -> Duration {
        self.shutdown_started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .unwrap_or_default()
    }

    /// Fraction of the tasks active at shutdown that have since finished
    pub fn progress(&self) -> f64 {
        if self.initial_task_count == 0 {
            return 1.0;
        }
        let finished = self.initial_task_count.saturating_sub(self.tasks_remaining);
        finished as f64 / self.initial_task_count as f64
    }
}

impl Default for ShutdownStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for scheduler behavior
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker loops started by `start()`
    pub workers: usize,
    /// Queue capacity; submissions beyond it are rejected
    pub max_queue_size: usize,
    /// How long an idle worker waits on the queue before re-checking shutdown
    pub poll_interval: Duration,
    /// Number of purged task snapshots kept by `cleanup_older_than`
    pub history_size: usize,
    /// Retry policy used when a task spec does not override it
    pub default_retry_policy: RetryPolicy,
    /// Per-attempt timeout used when a task spec does not set one
    pub default_timeout: Option<Duration>,
    pub shutdown_config: ShutdownConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_queue_size: 1000,
            poll_interval: Duration::from_millis(100),
            history_size: 1000,
            default_retry_policy: RetryPolicy::default(),
            default_timeout: None,
            shutdown_config: ShutdownConfig::default(),
        }
    }
}
