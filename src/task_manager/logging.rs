use crate::task_manager::types::{TaskId, TaskKind};
use std::time::Instant;
use tracing::{Span, field};
use uuid::Uuid;

/// Ties together every log line emitted for one task, across all of its attempts
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Every log line of a task shares the task's own UUID
    pub fn from_task_id(task_id: &TaskId) -> Self {
        Self(task_id.as_uuid())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Tracing state of a single task attempt
#[derive(Debug, Clone)]
pub struct TaskLoggingContext {
    pub correlation_id: CorrelationId,
    pub task_id: TaskId,
    pub task_name: String,
    pub kind: TaskKind,
    pub attempt: u32,
    span: Span,
    started: Instant,
}

impl TaskLoggingContext {
    /// Opens the `task_execution` span of the attempt. `result`, `duration_ms` and
    /// `error_type` stay empty until [`settle`](Self::settle) is called.
    pub fn new(task_id: TaskId, task_name: String, kind: TaskKind, attempt: u32) -> Self {
        let correlation_id = CorrelationId::from_task_id(&task_id);
        let span = tracing::info_span!(
            "task_execution",
            correlation_id = %correlation_id,
            task_id = %task_id,
            task_name = %task_name,
            kind = %kind,
            attempt,
            result = field::Empty,
            duration_ms = field::Empty,
            error_type = field::Empty,
        );
        Self {
            correlation_id,
            task_id,
            task_name,
            kind,
            attempt,
            span,
            started: Instant::now(),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Record how the attempt ended on its span
    pub fn settle(&self, result: &'static str, error_type: Option<&'static str>) {
        self.span.record("duration_ms", self.elapsed_ms());
        self.span.record("result", result);
        if let Some(error_type) = error_type {
            self.span.record("error_type", error_type);
        }
    }
}
