//! Worker loops that pull tasks off the priority queue and drive their attempts.
//!
//! Every attempt runs in its own spawned tokio task, so a panicking body is reported as
//! an execution error instead of taking the worker down, and a timed-out attempt can be
//! abandoned while the worker moves on.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::task_manager::handle::{TaskError, TaskRecord};
use crate::task_manager::logging::TaskLoggingContext;
use crate::task_manager::metrics::WorkerStats;
use crate::task_manager::notify::TaskEventPublisher;
use crate::task_manager::queue::PriorityWorkQueue;
use crate::task_manager::types::{TaskOutcome, TaskStatus};

pub(crate) struct Worker<T> {
    id: usize,
    queue: Arc<PriorityWorkQueue<T>>,
    events: TaskEventPublisher,
    stats: Arc<Mutex<WorkerStats>>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> Worker<T> {
    pub fn new(
        id: usize,
        queue: Arc<PriorityWorkQueue<T>>,
        events: TaskEventPublisher,
        stats: Arc<Mutex<WorkerStats>>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            events,
            stats,
            poll_interval,
            shutdown,
        }
    }

    /// Pop and execute tasks until the shutdown token fires
    pub async fn run(self) {
        tracing::info!(worker_id = self.id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.queue.pop(self.poll_interval) => next,
            };

            if let Some(record) = next {
                self.process(record).await;
            }
        }

        tracing::info!(worker_id = self.id, "Worker stopped");
    }

    async fn process(&self, record: Arc<TaskRecord<T>>) {
        if record.status() == TaskStatus::Cancelled {
            tracing::debug!(
                worker_id = self.id,
                task_id = %record.id,
                task_name = %record.name,
                "Skipping cancelled task"
            );
            return;
        }
        if !record.mark_running() {
            return;
        }

        self.stats.lock().begin(record.id);
        self.events.started(&record, self.id).await;

        let started = Instant::now();
        let final_status = self.attempt_loop(&record, started).await;
        let elapsed = started.elapsed();

        let mut stats = self.stats.lock();
        match final_status {
            TaskStatus::Completed => stats.record_completed(elapsed),
            TaskStatus::Failed => stats.record_failed(elapsed),
            _ => stats.record_cancelled(elapsed),
        }
    }

    /// Attempts `0..=retries`, with cancellation observed between attempts and during
    /// the retry sleep. Returns the terminal status reached.
    async fn attempt_loop(&self, record: &Arc<TaskRecord<T>>, started: Instant) -> TaskStatus {
        let policy = record.retry_policy().clone();
        let mut attempt = 0;

        loop {
            if record.is_cancel_requested() {
                let error = TaskError::cancelled(attempt, record.correlation_id);
                record.finish(
                    TaskStatus::Cancelled,
                    TaskOutcome::failure(error, started.elapsed()),
                );
                tracing::info!(
                    worker_id = self.id,
                    task_id = %record.id,
                    task_name = %record.name,
                    attempt = attempt,
                    "Task cancelled at attempt boundary"
                );
                self.events.cancelled(record).await;
                return TaskStatus::Cancelled;
            }

            record.set_current_retry(attempt);
            self.stats.lock().record_attempt();

            match self.run_attempt(record, attempt).await {
                Ok(value) => {
                    let duration = started.elapsed();
                    record.finish(
                        TaskStatus::Completed,
                        TaskOutcome::success(value, duration),
                    );
                    self.events
                        .completed(record, attempt + 1, duration.as_millis() as u64)
                        .await;
                    return TaskStatus::Completed;
                }
                Err(error) => {
                    record.record_attempt_error(&error);

                    if record.is_cancel_requested() {
                        continue;
                    }

                    if policy.has_remaining(attempt) {
                        let delay = policy.delay_for(attempt);
                        tracing::warn!(
                            worker_id = self.id,
                            task_id = %record.id,
                            task_name = %record.name,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying task after failed attempt"
                        );
                        self.events
                            .retrying(record, &error, delay.as_millis() as u64)
                            .await;

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = record.cancelled() => {}
                        }
                        attempt += 1;
                        continue;
                    }

                    record.finish(
                        TaskStatus::Failed,
                        TaskOutcome::failure(error.clone(), started.elapsed()),
                    );
                    tracing::error!(
                        worker_id = self.id,
                        task_id = %record.id,
                        task_name = %record.name,
                        attempts = attempt + 1,
                        failure = %error.failure,
                        "Task failed after exhausting retries"
                    );
                    self.events.failed(record, attempt + 1, &error).await;
                    return TaskStatus::Failed;
                }
            }
        }
    }

    /// One attempt of the task body, bounded by the task's timeout when it has one.
    ///
    /// On timeout the attempt's token is cancelled and its tokio task detached: the
    /// body keeps running until it returns or observes the token.
    async fn run_attempt(&self, record: &Arc<TaskRecord<T>>, attempt: u32) -> Result<T, TaskError> {
        let log_ctx =
            TaskLoggingContext::new(record.id, record.name.clone(), record.kind, attempt);
        let span = log_ctx.span();

        let attempt_token = record.attempt_token();
        let future = (record.function())(record.context(attempt, attempt_token.clone()));
        let correlation_id = record.correlation_id;
        let timeout = record.timeout();
        let worker_id = self.id;

        async move {
            tracing::info!(worker_id = worker_id, "Starting task attempt");

            let mut handle = tokio::spawn(future.in_current_span());
            let joined = match timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        attempt_token.cancel();
                        log_ctx.settle("timeout", Some("timeout"));
                        tracing::warn!(
                            timeout_ms = limit.as_millis() as u64,
                            "Task attempt timed out, abandoning it"
                        );
                        return Err(TaskError::timeout(limit, attempt, correlation_id));
                    }
                },
                None => handle.await,
            };

            match joined {
                Ok(Ok(value)) => {
                    log_ctx.settle("success", None);
                    tracing::info!(
                        duration_ms = log_ctx.elapsed_ms(),
                        "Task attempt completed successfully"
                    );
                    Ok(value)
                }
                Ok(Err(error)) => {
                    let error_type = if attempt_token.is_cancelled() {
                        "cancelled"
                    } else {
                        "execution"
                    };
                    log_ctx.settle("error", Some(error_type));
                    Err(TaskError::new(&*error, attempt, correlation_id))
                }
                Err(join_error) => {
                    log_ctx.settle("panic", Some("panic"));
                    let detail = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "attempt was aborted".to_string()
                    };
                    Err(TaskError::panicked(&detail, attempt, correlation_id))
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
