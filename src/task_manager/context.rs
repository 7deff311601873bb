use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::task_manager::types::{ProgressCallback, TaskId, TaskKind, TaskProgress};

/// Handle a task body uses to publish progress
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    progress: Arc<Mutex<TaskProgress>>,
    callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .field("progress", &*self.progress.lock())
            .finish()
    }
}

impl ProgressReporter {
    pub(crate) fn new(
        task_id: TaskId,
        progress: Arc<Mutex<TaskProgress>>,
        callback: Option<ProgressCallback>,
    ) -> Self {
        Self {
            task_id,
            progress,
            callback,
        }
    }

    pub fn report(&self, percent: u8, message: impl Into<String>, stage: impl Into<String>) {
        let update = TaskProgress::new(percent, message, stage);
        *self.progress.lock() = update.clone();

        tracing::debug!(
            task_id = %self.task_id,
            percent = update.percent,
            stage = %update.stage,
            "Task progress: {}", update.message
        );

        if let Some(callback) = &self.callback {
            callback(self.task_id, &update);
        }
    }

    pub fn current(&self) -> TaskProgress {
        self.progress.lock().clone()
    }
}

/// Execution context passed to every attempt of a task body
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    /// Zero-based attempt number
    pub attempt: u32,
    cancellation: CancellationToken,
    progress: ProgressReporter,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        name: String,
        kind: TaskKind,
        attempt: u32,
        cancellation: CancellationToken,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            task_id,
            name,
            kind,
            attempt,
            cancellation,
            progress,
        }
    }

    /// True once the task was cancelled or this attempt timed out
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn report_progress(&self, percent: u8, message: impl Into<String>, stage: impl Into<String>) {
        self.progress.report(percent, message, stage);
    }
}
