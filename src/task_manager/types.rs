use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task_manager::handle::TaskError;

/// Unique identifier for tasks
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID for correlation ID purposes
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a task.
///
/// Transitions only move forward: `Pending -> Queued -> Running -> {Completed, Failed,
/// Cancelled}`, with `Cancelled` also reachable from `Pending` and `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Running
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Queued)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Category of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    CsvImport,
    Analysis,
    Export,
    User,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::CsvImport,
        TaskKind::Analysis,
        TaskKind::Export,
        TaskKind::User,
    ];
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::CsvImport => write!(f, "csv_import"),
            TaskKind::Analysis => write!(f, "analysis"),
            TaskKind::Export => write!(f, "export"),
            TaskKind::User => write!(f, "user"),
        }
    }
}

/// Scheduling priority; higher variants are dequeued first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Progress reported by a running task body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Completion percentage, clamped to 0-100
    pub percent: u8,
    pub message: String,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskProgress {
    pub fn new(percent: u8, message: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
            stage: stage.into(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::new(0, "", "")
    }
}

/// Why an attempt or a task ended unsuccessfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The task body returned an error or panicked
    Execution,
    /// The attempt exceeded its per-attempt timeout
    Timeout,
    /// The task was cancelled before it could finish
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Execution => write!(f, "execution"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of a task, set exactly once
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<TaskError>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl<T> TaskOutcome<T> {
    pub fn success(value: T, duration: Duration) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            duration,
        }
    }

    pub fn failure(error: TaskError, duration: Duration) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error),
            duration,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.failure)
    }
}

/// Boxed error type returned by task bodies and event handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for task function results
pub type TaskResult<T> = Result<T, BoxError>;

/// Restartable task body: called once per attempt
pub type TaskFunction<T> =
    std::sync::Arc<dyn Fn(crate::task_manager::TaskContext) -> BoxFuture<'static, TaskResult<T>> + Send + Sync>;

/// Invoked once with the terminal outcome of a task
pub type CompletionCallback<T> = std::sync::Arc<dyn Fn(TaskId, &TaskOutcome<T>) + Send + Sync>;

/// Invoked on every progress update of a task
pub type ProgressCallback = std::sync::Arc<dyn Fn(TaskId, &TaskProgress) + Send + Sync>;

/// Shutdown phases for coordinated task termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    /// Normal operation, not shutting down
    Running,
    /// Stop accepting new tasks
    StopAccepting,
    /// Waiting for queued and running tasks to drain
    WaitingForTasks,
    /// Cancelling whatever is left and stopping workers
    ForceTerminating,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StopAccepting => write!(f, "stop_accepting"),
            ShutdownPhase::WaitingForTasks => write!(f, "waiting_for_tasks"),
            ShutdownPhase::ForceTerminating => write!(f, "force_terminating"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Statistics for scheduler monitoring
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub active_count: usize,
    pub total_tasks: usize,
    pub history_size: usize,
    pub by_kind: HashMap<TaskKind, usize>,
    pub by_status: HashMap<TaskStatus, usize>,
    pub workers: Vec<crate::task_manager::metrics::WorkerStats>,
    pub is_running: bool,
    pub shutdown_phase: ShutdownPhase,
}

pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
