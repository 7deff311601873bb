use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task_manager::types::TaskId;

/// Per-worker execution counters
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub attempts: u64,
    #[serde(with = "crate::task_manager::types::duration_secs")]
    pub total_execution_time: Duration,
    pub current_task: Option<TaskId>,
    pub last_active: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            tasks_completed: 0,
            tasks_failed: 0,
            tasks_cancelled: 0,
            attempts: 0,
            total_execution_time: Duration::ZERO,
            current_task: None,
            last_active: None,
        }
    }

    pub fn begin(&mut self, task_id: TaskId) {
        self.current_task = Some(task_id);
        self.last_active = Some(Utc::now());
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_completed(&mut self, elapsed: Duration) {
        self.tasks_completed += 1;
        self.finish(elapsed);
    }

    pub fn record_failed(&mut self, elapsed: Duration) {
        self.tasks_failed += 1;
        self.finish(elapsed);
    }

    pub fn record_cancelled(&mut self, elapsed: Duration) {
        self.tasks_cancelled += 1;
        self.finish(elapsed);
    }

    /// Total tasks this worker drove to a terminal state
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_cancelled
    }

    fn finish(&mut self, elapsed: Duration) {
        self.total_execution_time += elapsed;
        self.current_task = None;
        self.last_active = Some(Utc::now());
    }
}
