use crate::task_manager::handle::{TaskRecord, TaskSnapshot};
use crate::task_manager::types::{TaskId, TaskKind, TaskStatus};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Registry of live tasks plus a bounded history of purged ones
#[derive(Debug)]
pub struct TaskRegistry<T> {
    tasks: HashMap<TaskId, Arc<TaskRecord<T>>>,
    history: VecDeque<TaskSnapshot<T>>,
    history_limit: usize,
}

impl<T: Clone + Send + Sync + 'static> TaskRegistry<T> {
    pub fn new(history_limit: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// Register a new task record
    pub fn insert(&mut self, record: Arc<TaskRecord<T>>) {
        self.tasks.insert(record.id, record);
    }

    /// Get task by ID
    pub fn get(&self, id: &TaskId) -> Option<&Arc<TaskRecord<T>>> {
        self.tasks.get(id)
    }

    /// Live tasks carrying `name`, oldest first
    pub fn find_by_name(&self, name: &str) -> Vec<Arc<TaskRecord<T>>> {
        self.tasks
            .values()
            .filter(|record| record.name == name)
            .cloned()
            .sorted_by_key(|record| record.sequence())
            .collect()
    }

    /// Get tasks by status, in submission order
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Arc<TaskRecord<T>>> {
        self.tasks
            .values()
            .filter(|record| record.status() == status)
            .cloned()
            .sorted_by_key(|record| record.sequence())
            .collect()
    }

    /// Tasks that are pending, queued or running, in submission order
    pub fn active(&self) -> Vec<Arc<TaskRecord<T>>> {
        self.tasks
            .values()
            .filter(|record| record.status().is_active())
            .cloned()
            .sorted_by_key(|record| record.sequence())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|record| record.status().is_active())
            .count()
    }

    /// Most recently finished tasks, live and purged, newest first
    pub fn completed(&self, limit: usize) -> Vec<TaskSnapshot<T>> {
        self.tasks
            .values()
            .filter(|record| record.status().is_terminal())
            .map(|record| record.snapshot())
            .chain(self.history.iter().cloned())
            .sorted_by(|a, b| b.completed_at.cmp(&a.completed_at))
            .take(limit)
            .collect()
    }

    /// Archive terminal tasks that finished before `cutoff` into the history buffer
    /// and evict them from the live map. Returns how many were moved.
    pub fn purge_finished_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut expired: Vec<_> = self
            .tasks
            .values()
            .filter(|record| {
                record.status().is_terminal()
                    && record.completed_at().is_some_and(|done| done < cutoff)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|record| record.completed_at());

        for record in &expired {
            self.tasks.remove(&record.id);
            self.history.push_back(record.snapshot());
        }
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }

        expired.len()
    }

    /// Purged snapshots, newest first
    pub fn history(&self, limit: usize) -> Vec<TaskSnapshot<T>> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn count_by_status(&self) -> HashMap<TaskStatus, usize> {
        let mut counts: HashMap<TaskStatus, usize> =
            TaskStatus::ALL.iter().map(|&status| (status, 0)).collect();
        for record in self.tasks.values() {
            *counts.entry(record.status()).or_default() += 1;
        }
        counts
    }

    pub fn count_by_kind(&self) -> HashMap<TaskKind, usize> {
        let mut counts: HashMap<TaskKind, usize> =
            TaskKind::ALL.iter().map(|&kind| (kind, 0)).collect();
        for record in self.tasks.values() {
            *counts.entry(record.kind).or_default() += 1;
        }
        counts
    }

    /// Get total number of live tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}
