//! Bounded priority queue feeding the worker pool.
//!
//! Entries pop highest priority first; within a priority band the entry submitted
//! first (lowest sequence number) wins. A full queue rejects new work instead of
//! blocking or evicting.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::task_manager::error::SchedulerError;
use crate::task_manager::handle::TaskRecord;
use crate::task_manager::types::{TaskId, TaskPriority};

/// Entry in the priority queue.
struct QueueEntry<T> {
    priority: TaskPriority,
    sequence: u64,
    record: Arc<TaskRecord<T>>,
}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, then the older submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for QueueEntry<T> {}

pub struct PriorityWorkQueue<T> {
    heap: Mutex<BinaryHeap<QueueEntry<T>>>,
    capacity: usize,
    available: Notify,
}

impl<T> std::fmt::Debug for PriorityWorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityWorkQueue")
            .field("len", &self.heap.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> PriorityWorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity.min(1024))),
            capacity,
            available: Notify::new(),
        }
    }

    /// Enqueue a task, failing with `Capacity` when the queue is full
    pub fn push(&self, record: Arc<TaskRecord<T>>) -> Result<(), SchedulerError> {
        {
            let mut heap = self.heap.lock();
            if heap.len() >= self.capacity {
                return Err(SchedulerError::Capacity {
                    capacity: self.capacity,
                });
            }
            heap.push(QueueEntry {
                priority: record.priority,
                sequence: record.sequence(),
                record,
            });
        }
        self.available.notify_one();
        Ok(())
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<Arc<TaskRecord<T>>> {
        self.heap.lock().pop().map(|entry| entry.record)
    }

    /// Pop the next task, waiting up to `poll_interval` for one to arrive.
    ///
    /// Returns `None` when nothing arrived in time so the caller can re-check
    /// shutdown and cancellation.
    pub async fn pop(&self, poll_interval: Duration) -> Option<Arc<TaskRecord<T>>> {
        let notified = self.available.notified();
        tokio::pin!(notified);
        // Register interest before checking so a push between the check and the
        // wait is not lost.
        notified.as_mut().enable();

        if let Some(record) = self.try_pop() {
            return Some(record);
        }

        let _ = tokio::time::timeout(poll_interval, notified).await;
        self.try_pop()
    }

    /// Drop the entry for `task_id`, returning whether it was queued
    pub fn remove(&self, task_id: &TaskId) -> bool {
        let mut heap = self.heap.lock();
        let before = heap.len();
        heap.retain(|entry| entry.record.id != *task_id);
        heap.len() != before
    }

    /// Remove every queued entry, returning them in pop order
    pub fn drain(&self) -> Vec<Arc<TaskRecord<T>>> {
        let heap = std::mem::take(&mut *self.heap.lock());
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.record)
            .collect()
    }

    /// Drop every queued entry, returning how many there were
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_manager::handle::TaskParts;
    use crate::task_manager::retry::RetryPolicy;
    use crate::task_manager::types::TaskKind;
    use futures::FutureExt;

    fn record(name: &str, priority: TaskPriority, sequence: u64) -> Arc<TaskRecord<()>> {
        let parts = TaskParts {
            name: name.to_string(),
            kind: TaskKind::User,
            priority,
            retry_policy: RetryPolicy::default(),
            timeout: None,
            function: Arc::new(|_ctx| async { Ok(()) }.boxed()),
            on_complete: None,
            on_progress: None,
        };
        Arc::new(TaskRecord::new(parts, sequence))
    }

    fn names(records: Vec<Arc<TaskRecord<()>>>) -> Vec<String> {
        records.into_iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_urgent_before_low() {
        let queue = PriorityWorkQueue::new(10);
        queue.push(record("urgent", TaskPriority::Urgent, 0)).unwrap();
        queue.push(record("low", TaskPriority::Low, 1)).unwrap();

        assert_eq!(queue.try_pop().unwrap().name, "urgent");
        assert_eq!(queue.try_pop().unwrap().name, "low");
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority_band() {
        let queue = PriorityWorkQueue::new(10);
        queue.push(record("first", TaskPriority::Normal, 0)).unwrap();
        queue.push(record("second", TaskPriority::Normal, 1)).unwrap();
        queue.push(record("third", TaskPriority::Normal, 2)).unwrap();

        assert_eq!(names(queue.drain()), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_mixed_priorities_dequeue_order() {
        let queue = PriorityWorkQueue::new(10);
        let priorities = [
            TaskPriority::Low,
            TaskPriority::Urgent,
            TaskPriority::Normal,
            TaskPriority::Urgent,
            TaskPriority::Low,
        ];
        for (idx, priority) in priorities.into_iter().enumerate() {
            queue
                .push(record(&format!("task_{idx}"), priority, idx as u64))
                .unwrap();
        }

        let mut order = Vec::new();
        while let Some(next) = queue.try_pop() {
            order.push(next.name.clone());
        }
        assert_eq!(order, vec!["task_1", "task_3", "task_2", "task_0", "task_4"]);
    }

    #[test]
    fn test_push_rejects_when_full() {
        let queue = PriorityWorkQueue::new(2);
        queue.push(record("a", TaskPriority::Low, 0)).unwrap();
        queue.push(record("b", TaskPriority::Low, 1)).unwrap();

        let err = queue.push(record("c", TaskPriority::Urgent, 2)).unwrap_err();
        assert_eq!(err, SchedulerError::Capacity { capacity: 2 });
        assert_eq!(queue.len(), 2);
        assert!(queue.is_full());
    }

    #[test]
    fn test_remove_frees_capacity() {
        let queue = PriorityWorkQueue::new(1);
        let queued = record("a", TaskPriority::Normal, 0);
        let id = queued.id;
        queue.push(queued).unwrap();

        assert!(queue.remove(&id));
        assert!(!queue.remove(&id));
        assert!(queue.is_empty());
        queue.push(record("b", TaskPriority::Normal, 1)).unwrap();
    }

    /// Requeue everything still pending, with no bounds on the payload type
    fn requeue_pending<T>(queue: &PriorityWorkQueue<T>, records: Vec<Arc<TaskRecord<T>>>) -> usize {
        records
            .into_iter()
            .filter(|record| !record.status().is_terminal())
            .filter_map(|record| queue.push(record).ok())
            .count()
    }

    #[test]
    fn test_queue_accepts_any_payload_type() {
        let queue = PriorityWorkQueue::new(2);
        let records = vec![
            record("a", TaskPriority::Normal, 0),
            record("b", TaskPriority::High, 1),
            record("c", TaskPriority::Low, 2),
        ];

        assert_eq!(requeue_pending(&queue, records), 2);
        let first = queue.try_pop().unwrap();
        assert_eq!(first.name, "b");
        assert_eq!(first.sequence(), 1);
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let queue: PriorityWorkQueue<()> = PriorityWorkQueue::new(4);
        let start = std::time::Instant::now();

        assert!(queue.pop(Duration::from_millis(20)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(PriorityWorkQueue::new(4));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(record("late", TaskPriority::High, 0)).unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop should wake up")
            .unwrap();
        assert_eq!(popped.unwrap().name, "late");
    }
}
