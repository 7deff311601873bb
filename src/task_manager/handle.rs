use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::task_manager::context::{ProgressReporter, TaskContext};
use crate::task_manager::logging::CorrelationId;
use crate::task_manager::retry::RetryPolicy;
use crate::task_manager::types::{
    CompletionCallback, FailureKind, ProgressCallback, TaskFunction, TaskId, TaskKind,
    TaskOutcome, TaskPriority, TaskProgress, TaskStatus,
};

/// Number of attempt errors retained per task
const ERROR_HISTORY_LIMIT: usize = 10;

/// Error information for a failed attempt, with its source chain preserved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
    pub failure: FailureKind,
    /// Zero-based attempt that produced the error
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub error_chain: Vec<String>,
}

impl TaskError {
    pub fn new(
        error: &(dyn std::error::Error + 'static),
        attempt: u32,
        correlation_id: CorrelationId,
    ) -> Self {
        let mut error_chain = Vec::new();
        let mut current_error = Some(error);

        while let Some(err) = current_error {
            error_chain.push(err.to_string());
            current_error = err.source();
        }

        Self {
            message: error.to_string(),
            failure: FailureKind::Execution,
            attempt,
            timestamp: Utc::now(),
            correlation_id,
            error_chain,
        }
    }

    pub fn timeout(limit: Duration, attempt: u32, correlation_id: CorrelationId) -> Self {
        Self::with_message(
            format!("timeout: attempt exceeded {}ms", limit.as_millis()),
            FailureKind::Timeout,
            attempt,
            correlation_id,
        )
    }

    pub fn panicked(detail: &str, attempt: u32, correlation_id: CorrelationId) -> Self {
        Self::with_message(
            format!("task panicked: {detail}"),
            FailureKind::Execution,
            attempt,
            correlation_id,
        )
    }

    pub fn cancelled(attempt: u32, correlation_id: CorrelationId) -> Self {
        Self::with_message(
            "task was cancelled".to_string(),
            FailureKind::Cancelled,
            attempt,
            correlation_id,
        )
    }

    fn with_message(
        message: String,
        failure: FailureKind,
        attempt: u32,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            error_chain: vec![message.clone()],
            message,
            failure,
            attempt,
            timestamp: Utc::now(),
            correlation_id,
        }
    }

    pub fn log_structured(&self, task_name: &str) {
        tracing::error!(
            correlation_id = %self.correlation_id,
            task_name = task_name,
            failure = %self.failure,
            attempt = self.attempt,
            error_chain = ?self.error_chain,
            "Task attempt failed: {}", self.message
        );
    }
}

/// What `TaskRecord::cancel` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// The task had not started and is now `Cancelled`
    Immediate,
    /// The task is running; it will stop at the next attempt boundary
    Requested,
    /// The task was already terminal
    AlreadyFinished,
}

/// Read-only view of a task at one instant
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot<T> {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub current_retry: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: Option<u64>,
    pub cancel_requested: bool,
    pub progress: TaskProgress,
    pub result: Option<TaskOutcome<T>>,
    pub error_history: Vec<TaskError>,
}

impl<T> TaskSnapshot<T> {
    /// Wall time between start and completion, when both happened
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => (completed - started).to_std().ok(),
            _ => None,
        }
    }
}

struct TaskState<T> {
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    current_retry: u32,
    outcome: Option<TaskOutcome<T>>,
    error_history: Vec<TaskError>,
}

/// Everything a task needs to be built, resolved against scheduler defaults
pub(crate) struct TaskParts<T> {
    pub name: String,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub retry_policy: RetryPolicy,
    pub timeout: Option<Duration>,
    pub function: TaskFunction<T>,
    pub on_complete: Option<CompletionCallback<T>>,
    pub on_progress: Option<ProgressCallback>,
}

/// A submitted task and its mutable lifecycle state.
///
/// Owned by the registry behind an `Arc`; the queue and the executing worker only hold
/// clones of that `Arc`.
pub struct TaskRecord<T> {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub correlation_id: CorrelationId,
    sequence: u64,
    created_at: DateTime<Utc>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    function: TaskFunction<T>,
    on_complete: Option<CompletionCallback<T>>,
    on_progress: Option<ProgressCallback>,
    state: Mutex<TaskState<T>>,
    progress: Arc<Mutex<TaskProgress>>,
    cancel_token: CancellationToken,
    done_tx: watch::Sender<bool>,
}

impl<T> std::fmt::Debug for TaskRecord<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("status", &self.state.lock().status)
            .field("function", &"<function>")
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> TaskRecord<T> {
    pub(crate) fn new(parts: TaskParts<T>, sequence: u64) -> Self {
        let id = TaskId::new();
        let correlation_id = CorrelationId::from_task_id(&id);
        let (done_tx, _) = watch::channel(false);

        tracing::debug!(
            correlation_id = %correlation_id,
            task_id = %id,
            task_name = %parts.name,
            kind = %parts.kind,
            priority = %parts.priority,
            "Task record created"
        );

        Self {
            id,
            name: parts.name,
            kind: parts.kind,
            priority: parts.priority,
            correlation_id,
            sequence,
            created_at: Utc::now(),
            retry_policy: parts.retry_policy,
            timeout: parts.timeout,
            function: parts.function,
            on_complete: parts.on_complete,
            on_progress: parts.on_progress,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                started_at: None,
                completed_at: None,
                current_retry: 0,
                outcome: None,
                error_history: Vec::new(),
            }),
            progress: Arc::new(Mutex::new(TaskProgress::default())),
            cancel_token: CancellationToken::new(),
            done_tx,
        }
    }
}

impl<T> TaskRecord<T> {
    /// Get current task status
    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().completed_at
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn progress(&self) -> TaskProgress {
        self.progress.lock().clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }
}

impl<T: Clone + Send + Sync + 'static> TaskRecord<T> {
    pub fn outcome(&self) -> Option<TaskOutcome<T>> {
        self.state.lock().outcome.clone()
    }

    /// Receiver flipped to `true` exactly once, at the terminal transition
    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&self, next: TaskStatus) -> bool {
        let mut state = self.state.lock();
        self.apply_transition(&mut state, next)
    }

    fn apply_transition(&self, state: &mut TaskState<T>, next: TaskStatus) -> bool {
        let current = state.status;
        if !current.can_transition_to(next) {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                task_id = %self.id,
                task_name = %self.name,
                current_state = %current,
                attempted_state = %next,
                "Invalid task state transition attempted"
            );
            return false;
        }

        state.status = next;
        tracing::debug!(
            correlation_id = %self.correlation_id,
            task_id = %self.id,
            task_name = %self.name,
            old_state = %current,
            new_state = %next,
            "Task state transition"
        );
        true
    }

    /// `Queued -> Running`; stamps `started_at` on the first call
    pub(crate) fn mark_running(&self) -> bool {
        let mut state = self.state.lock();
        if !self.apply_transition(&mut state, TaskStatus::Running) {
            return false;
        }
        state.started_at.get_or_insert_with(Utc::now);
        true
    }

    pub(crate) fn set_current_retry(&self, attempt: u32) {
        self.state.lock().current_retry = attempt.min(self.retry_policy.retries);
    }

    /// Record a failed attempt in the bounded error history
    pub(crate) fn record_attempt_error(&self, error: &TaskError) {
        error.log_structured(&self.name);

        let mut state = self.state.lock();
        state.error_history.push(error.clone());
        if state.error_history.len() > ERROR_HISTORY_LIMIT {
            state.error_history.remove(0);
        }
    }

    /// Terminal transition: stores the outcome, signals waiters, runs the completion
    /// callback. Returns false if the task was already terminal.
    pub(crate) fn finish(&self, status: TaskStatus, outcome: TaskOutcome<T>) -> bool {
        let stored = {
            let mut state = self.state.lock();
            self.finish_locked(&mut state, status, outcome)
        };
        match stored {
            Some(outcome) => {
                self.after_finish(&outcome);
                true
            }
            None => false,
        }
    }

    fn finish_locked(
        &self,
        state: &mut TaskState<T>,
        status: TaskStatus,
        outcome: TaskOutcome<T>,
    ) -> Option<TaskOutcome<T>> {
        debug_assert!(status.is_terminal());
        if state.outcome.is_some() || !self.apply_transition(state, status) {
            return None;
        }
        state.completed_at = Some(Utc::now());
        state.outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn after_finish(&self, outcome: &TaskOutcome<T>) {
        self.done_tx.send_replace(true);
        if let Some(callback) = &self.on_complete {
            callback(self.id, outcome);
        }
    }

    /// Request cancellation. Tasks that have not started are cancelled on the spot;
    /// running tasks observe the request at their next attempt boundary.
    pub fn cancel(&self) -> CancelDisposition {
        let (disposition, stored) = {
            let mut state = self.state.lock();
            match state.status {
                TaskStatus::Pending | TaskStatus::Queued => {
                    let attempt = state.current_retry;
                    let error = TaskError::cancelled(attempt, self.correlation_id);
                    let outcome = TaskOutcome::failure(error, Duration::ZERO);
                    let stored = self.finish_locked(&mut state, TaskStatus::Cancelled, outcome);
                    (CancelDisposition::Immediate, stored)
                }
                TaskStatus::Running => (CancelDisposition::Requested, None),
                _ => (CancelDisposition::AlreadyFinished, None),
            }
        };

        if disposition != CancelDisposition::AlreadyFinished {
            self.cancel_token.cancel();
        }
        if let Some(outcome) = stored {
            self.after_finish(&outcome);
        }

        tracing::info!(
            correlation_id = %self.correlation_id,
            task_id = %self.id,
            task_name = %self.name,
            disposition = ?disposition,
            "Task cancellation requested"
        );
        disposition
    }

    /// Build the context handed to one attempt of the task body
    pub(crate) fn context(&self, attempt: u32, attempt_token: CancellationToken) -> TaskContext {
        TaskContext::new(
            self.id,
            self.name.clone(),
            self.kind,
            attempt,
            attempt_token,
            ProgressReporter::new(self.id, self.progress.clone(), self.on_progress.clone()),
        )
    }

    /// Child token cancelled together with the task's own token
    pub(crate) fn attempt_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    pub(crate) fn function(&self) -> TaskFunction<T> {
        self.function.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot<T> {
        let state = self.state.lock();
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            priority: self.priority,
            status: state.status,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            retries: self.retry_policy.retries,
            current_retry: state.current_retry,
            retry_delay_ms: self.retry_policy.retry_delay.as_millis() as u64,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            cancel_requested: self.cancel_token.is_cancelled(),
            progress: self.progress.lock().clone(),
            result: state.outcome.clone(),
            error_history: state.error_history.clone(),
        }
    }
}
