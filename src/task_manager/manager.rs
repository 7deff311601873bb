use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;
use crate::task_manager::config::{SchedulerConfig, ShutdownStatus};
use crate::task_manager::error::SchedulerError;
use crate::task_manager::handle::{CancelDisposition, TaskRecord, TaskSnapshot};
use crate::task_manager::metrics::WorkerStats;
use crate::task_manager::notify::TaskEventPublisher;
use crate::task_manager::queue::PriorityWorkQueue;
use crate::task_manager::registry::TaskRegistry;
use crate::task_manager::spec::TaskSpec;
use crate::task_manager::types::{
    SchedulerStats, ShutdownPhase, TaskId, TaskOutcome, TaskProgress, TaskStatus,
};
use crate::task_manager::worker::Worker;

struct SchedulerInner<T> {
    config: SchedulerConfig,
    registry: RwLock<TaskRegistry<T>>,
    queue: Arc<PriorityWorkQueue<T>>,
    events: TaskEventPublisher,
    sequence: AtomicU64,
    started: AtomicBool,
    accepting: AtomicBool,
    /// Held shared by `submit` from its running check to the registry insert, and
    /// exclusively by `shutdown` while it stops accepting
    submit_gate: RwLock<()>,
    shutdown_token: CancellationToken,
    workers: Mutex<Option<JoinSet<()>>>,
    worker_stats: Vec<Arc<Mutex<WorkerStats>>>,
    shutdown_status: Mutex<ShutdownStatus>,
}

/// Priority task scheduler backed by a fixed pool of worker loops.
///
/// Cloning is cheap and every clone drives the same scheduler, so a handle can be
/// passed to whatever component submits work.
pub struct TaskScheduler<T> {
    inner: Arc<SchedulerInner<T>>,
}

impl<T> Clone for TaskScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TaskScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.inner.config)
            .field("queue", &self.inner.queue)
            .field("accepting", &self.inner.accepting.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> TaskScheduler<T> {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Scheduler that publishes task lifecycle events on `bus`
    pub fn with_event_bus(config: SchedulerConfig, bus: EventBus) -> Self {
        Self::build(config, Some(bus))
    }

    fn build(config: SchedulerConfig, bus: Option<EventBus>) -> Self {
        let worker_count = config.workers.max(1);
        let worker_stats = (0..worker_count)
            .map(|id| Arc::new(Mutex::new(WorkerStats::new(id))))
            .collect();

        Self {
            inner: Arc::new(SchedulerInner {
                registry: RwLock::new(TaskRegistry::new(config.history_size)),
                queue: Arc::new(PriorityWorkQueue::new(config.max_queue_size)),
                events: TaskEventPublisher::new(bus),
                sequence: AtomicU64::new(0),
                started: AtomicBool::new(false),
                accepting: AtomicBool::new(false),
                submit_gate: RwLock::new(()),
                shutdown_token: CancellationToken::new(),
                workers: Mutex::new(None),
                worker_stats,
                shutdown_status: Mutex::new(ShutdownStatus::new()),
                config,
            }),
        }
    }

    /// Spawn the worker loops. A scheduler can only be started once.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let mut workers = JoinSet::new();
        for (worker_id, stats) in self.inner.worker_stats.iter().enumerate() {
            let worker = Worker::new(
                worker_id,
                self.inner.queue.clone(),
                self.inner.events.clone(),
                stats.clone(),
                self.inner.config.poll_interval,
                self.inner.shutdown_token.child_token(),
            );
            workers.spawn(worker.run());
        }
        *self.inner.workers.lock() = Some(workers);
        self.inner.accepting.store(true, Ordering::Release);

        tracing::info!(
            workers = self.inner.worker_stats.len(),
            max_queue_size = self.inner.config.max_queue_size,
            "Task scheduler started"
        );
        self.inner.events.system_started().await;
        Ok(())
    }

    /// Queue a task for execution.
    ///
    /// Fails with `NotRunning` before `start()` or once shutdown began, and with
    /// `Capacity` when the queue is full; in both cases no task is created.
    pub async fn submit(&self, spec: TaskSpec<T>) -> Result<TaskId, SchedulerError> {
        let record = self.enqueue(spec)?;

        tracing::info!(
            task_id = %record.id,
            task_name = %record.name,
            kind = %record.kind,
            priority = %record.priority,
            "Task submitted"
        );
        self.inner.events.submitted(&record).await;
        Ok(record.id)
    }

    /// Create, queue and register a task while shutdown is held off
    fn enqueue(&self, spec: TaskSpec<T>) -> Result<Arc<TaskRecord<T>>, SchedulerError> {
        let _gate = self.inner.submit_gate.read();
        if !self.is_running() {
            tracing::warn!(task_name = %spec.name(), "Rejecting task: scheduler is not running");
            return Err(SchedulerError::NotRunning);
        }

        let parts = spec.into_parts(&self.inner.config);
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(TaskRecord::new(parts, sequence));
        record.transition(TaskStatus::Queued);

        if let Err(error) = self.inner.queue.push(record.clone()) {
            tracing::warn!(
                task_name = %record.name,
                queue_size = self.inner.queue.len(),
                error = %error,
                "Task rejected"
            );
            return Err(error);
        }
        self.inner.registry.write().insert(record.clone());
        Ok(record)
    }

    /// Request cancellation of a task.
    ///
    /// Returns true iff the task existed and was pending, queued or running. Queued
    /// tasks become `Cancelled` at once and never run; running tasks stop at their next
    /// attempt boundary.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let Some(record) = self.record(id) else {
            return false;
        };

        match record.cancel() {
            CancelDisposition::Immediate => {
                self.inner.queue.remove(id);
                self.inner.events.cancelled(&record).await;
                true
            }
            CancelDisposition::Requested => true,
            CancelDisposition::AlreadyFinished => false,
        }
    }

    fn record(&self, id: &TaskId) -> Option<Arc<TaskRecord<T>>> {
        self.inner.registry.read().get(id).cloned()
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.record(id).map(|record| record.status())
    }

    pub fn progress(&self, id: &TaskId) -> Option<TaskProgress> {
        self.record(id).map(|record| record.progress())
    }

    /// Terminal outcome; `None` while the task is still live or when it is unknown
    pub fn result(&self, id: &TaskId) -> Option<TaskOutcome<T>> {
        self.record(id).and_then(|record| record.outcome())
    }

    pub fn task(&self, id: &TaskId) -> Option<TaskSnapshot<T>> {
        self.record(id).map(|record| record.snapshot())
    }

    /// Wait for a task to reach a terminal state.
    ///
    /// `None` means the timeout elapsed first or the task is unknown; it says nothing
    /// about whether the task failed.
    pub async fn wait(&self, id: &TaskId, timeout: Option<Duration>) -> Option<TaskOutcome<T>> {
        let record = self.record(id)?;
        let mut done = record.subscribe_done();
        let finished = async move { done.wait_for(|finished| *finished).await.is_ok() };

        let finished = match timeout {
            Some(limit) => tokio::time::timeout(limit, finished).await.unwrap_or(false),
            None => finished.await,
        };
        if finished { record.outcome() } else { None }
    }

    pub fn active_tasks(&self) -> Vec<TaskSnapshot<T>> {
        self.inner
            .registry
            .read()
            .active()
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }

    /// Most recently finished tasks, including purged ones, newest first
    pub fn completed_tasks(&self, limit: usize) -> Vec<TaskSnapshot<T>> {
        self.inner.registry.read().completed(limit)
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<TaskSnapshot<T>> {
        self.inner
            .registry
            .read()
            .tasks_by_status(status)
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }

    pub fn tasks_by_name(&self, name: &str) -> Vec<TaskSnapshot<T>> {
        self.inner
            .registry
            .read()
            .find_by_name(name)
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }

    /// Snapshots moved out of the live map by `cleanup_older_than`, newest first
    pub fn history(&self, limit: usize) -> Vec<TaskSnapshot<T>> {
        self.inner.registry.read().history(limit)
    }

    /// Archive terminal tasks that finished more than `age` ago. Returns the number
    /// of tasks evicted from the live map.
    pub fn cleanup_older_than(&self, age: Duration) -> usize {
        let Some(cutoff) = TimeDelta::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let purged = self.inner.registry.write().purge_finished_before(cutoff);
        if purged > 0 {
            tracing::info!(purged = purged, "Archived finished tasks");
        }
        purged
    }

    pub fn statistics(&self) -> SchedulerStats {
        let (active_count, total_tasks, history_size, by_kind, by_status) = {
            let registry = self.inner.registry.read();
            (
                registry.active_count(),
                registry.len(),
                registry.history_len(),
                registry.count_by_kind(),
                registry.count_by_status(),
            )
        };

        SchedulerStats {
            queue_size: self.inner.queue.len(),
            queue_capacity: self.inner.queue.capacity(),
            active_count,
            total_tasks,
            history_size,
            by_kind,
            by_status,
            workers: self
                .inner
                .worker_stats
                .iter()
                .map(|stats| stats.lock().clone())
                .collect(),
            is_running: self.is_running(),
            shutdown_phase: self.shutdown_phase(),
        }
    }

    /// True between `start()` and the beginning of `shutdown()`
    pub fn is_running(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.inner.shutdown_status.lock().phase
    }

    pub fn shutdown_status(&self) -> ShutdownStatus {
        self.inner.shutdown_status.lock().clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.inner.events.bus()
    }

    /// Stop the scheduler in phases: stop accepting, let workers drain the queue for
    /// the graceful timeout, then cancel whatever is left and stop the workers within
    /// the force timeout.
    pub async fn shutdown(&self) -> ShutdownStatus {
        let was_accepting = {
            let _gate = self.inner.submit_gate.write();
            self.inner.accepting.swap(false, Ordering::AcqRel)
        };
        if !was_accepting {
            tracing::debug!("Shutdown requested on a scheduler that is not running");
            return self.shutdown_status();
        }

        let initial_task_count = self.inner.registry.read().active_count();
        {
            let now = Utc::now();
            let mut status = self.inner.shutdown_status.lock();
            status.phase = ShutdownPhase::StopAccepting;
            status.shutdown_started_at = Some(now);
            status.phase_started_at = Some(now);
            status.initial_task_count = initial_task_count;
            status.tasks_remaining = initial_task_count;
        }
        tracing::info!(
            initial_task_count = initial_task_count,
            "Phase 1: Stop accepting new tasks"
        );

        // Phase 2: workers keep draining the queue
        self.transition_shutdown_phase(ShutdownPhase::WaitingForTasks);
        let graceful_timeout = self.inner.config.shutdown_config.graceful_timeout;
        tracing::info!(
            timeout_ms = graceful_timeout.as_millis() as u64,
            "Phase 2: Waiting for tasks to complete gracefully"
        );
        let completed_gracefully = self
            .wait_for_active_tasks(Instant::now() + graceful_timeout)
            .await;
        if completed_gracefully {
            tracing::info!("All tasks completed gracefully");
        } else {
            tracing::warn!(
                remaining_tasks = self.inner.registry.read().active_count(),
                timeout_ms = graceful_timeout.as_millis() as u64,
                "Graceful shutdown timeout reached"
            );
        }

        let force_timeout = self.inner.config.shutdown_config.force_timeout;
        let deadline = Instant::now() + force_timeout;

        // Phase 3: cancel leftovers
        if !completed_gracefully {
            self.transition_shutdown_phase(ShutdownPhase::ForceTerminating);
            tracing::warn!(
                remaining_tasks = self.inner.registry.read().active_count(),
                timeout_ms = force_timeout.as_millis() as u64,
                "Phase 3: Force terminating remaining tasks"
            );

            let cancelled = self.cancel_all_tasks().await;
            self.inner.shutdown_status.lock().tasks_cancelled = cancelled;

            if !self.wait_for_active_tasks(deadline).await {
                tracing::error!(
                    remaining_tasks = self.inner.registry.read().active_count(),
                    "Force termination timeout reached, some task attempts are still running"
                );
            }
        }

        self.stop_workers(deadline).await;

        // Nothing pops the queue any more; anything left there would never finish
        let stranded = self.cancel_queued_tasks().await;
        if stranded > 0 {
            self.inner.shutdown_status.lock().tasks_cancelled += stranded;
        }

        // Phase 4: shutdown complete
        self.transition_shutdown_phase(ShutdownPhase::Complete);
        let final_status = {
            let remaining = self.inner.registry.read().active_count();
            let mut status = self.inner.shutdown_status.lock();
            status.completed_gracefully = completed_gracefully;
            status.tasks_remaining = remaining;
            status.clone()
        };

        tracing::info!(
            shutdown_duration_ms = final_status.shutdown_elapsed().as_millis() as u64,
            completed_gracefully = final_status.completed_gracefully,
            tasks_cancelled = final_status.tasks_cancelled,
            remaining_tasks = final_status.tasks_remaining,
            "Shutdown complete"
        );
        self.inner.events.system_stopped().await;

        final_status
    }

    fn transition_shutdown_phase(&self, new_phase: ShutdownPhase) {
        let remaining = self.inner.registry.read().active_count();
        let mut status = self.inner.shutdown_status.lock();
        let old_phase = status.phase;
        status.phase = new_phase;
        status.phase_started_at = Some(Utc::now());
        status.tasks_remaining = remaining;

        tracing::debug!(
            old_phase = %old_phase,
            new_phase = %new_phase,
            tasks_remaining = remaining,
            "Shutdown phase transition"
        );
    }

    /// Wait on every live task's completion signal until `deadline`.
    /// Returns true when all of them finished in time.
    async fn wait_for_active_tasks(&self, deadline: Instant) -> bool {
        let mut receivers: Vec<_> = self
            .inner
            .registry
            .read()
            .active()
            .iter()
            .map(|record| record.subscribe_done())
            .collect();

        let all_done = async move {
            for done in receivers.iter_mut() {
                let _ = done.wait_for(|finished| *finished).await;
            }
        };
        tokio::time::timeout_at(deadline, all_done).await.is_ok()
    }

    /// Cancel every live task and empty the queue. Returns how many were cancelled.
    async fn cancel_all_tasks(&self) -> usize {
        let active = self.inner.registry.read().active();
        let mut cancelled = 0;

        for record in &active {
            match record.cancel() {
                CancelDisposition::Immediate => {
                    cancelled += 1;
                    self.inner.events.cancelled(record).await;
                }
                CancelDisposition::Requested => cancelled += 1,
                CancelDisposition::AlreadyFinished => {}
            }
        }
        let dropped = self.inner.queue.clear();

        tracing::info!(
            cancelled_tasks = cancelled,
            dropped_queue_entries = dropped,
            "All tasks cancelled"
        );
        cancelled
    }

    /// Cancel every entry still in the queue. Returns how many were cancelled.
    async fn cancel_queued_tasks(&self) -> usize {
        let mut cancelled = 0;
        for record in self.inner.queue.drain() {
            if record.cancel() == CancelDisposition::Immediate {
                cancelled += 1;
                self.inner.events.cancelled(&record).await;
            }
        }
        if cancelled > 0 {
            tracing::warn!(cancelled_tasks = cancelled, "Cancelled tasks left in the queue");
        }
        cancelled
    }

    async fn stop_workers(&self, deadline: Instant) {
        self.inner.shutdown_token.cancel();

        let Some(mut workers) = self.inner.workers.lock().take() else {
            return;
        };
        let joined = tokio::time::timeout_at(deadline, async {
            while let Some(result) = workers.join_next().await {
                if let Err(error) = result {
                    tracing::error!(error = %error, "Worker task ended abnormally");
                }
            }
        })
        .await
        .is_ok();

        if !joined {
            tracing::warn!(
                remaining_workers = workers.len(),
                "Workers did not stop in time, aborting them"
            );
            workers.abort_all();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for TaskScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
