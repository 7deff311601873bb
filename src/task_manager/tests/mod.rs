mod stress_tests;

use super::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Config with short polling and shutdown timeouts
fn fast_config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        poll_interval: Duration::from_millis(10),
        shutdown_config: ShutdownConfig {
            graceful_timeout: Duration::from_secs(2),
            force_timeout: Duration::from_secs(1),
        },
        ..Default::default()
    }
}

async fn started<T: Clone + Send + Sync + 'static>(config: SchedulerConfig) -> TaskScheduler<T> {
    let scheduler = TaskScheduler::with_config(config);
    scheduler.start().await.unwrap();
    scheduler
}

/// Poll until `id` reaches `status`, panicking after one second
async fn wait_for_status<T: Clone + Send + Sync + 'static>(
    scheduler: &TaskScheduler<T>,
    id: &TaskId,
    status: TaskStatus,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while scheduler.status(id) != Some(status) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "task never reached {status}, last seen {:?}",
            scheduler.status(id)
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Submit a task that occupies a worker until `gate` is notified
async fn submit_blocker<T: Clone + Default + Send + Sync + 'static>(
    scheduler: &TaskScheduler<T>,
    gate: &Arc<Notify>,
) -> TaskId {
    let gate = gate.clone();
    let id = scheduler
        .submit(
            TaskSpec::new("blocker", TaskKind::User, move |_ctx| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(T::default())
                }
            })
            .priority(TaskPriority::Urgent),
        )
        .await
        .unwrap();
    wait_for_status(scheduler, &id, TaskStatus::Running).await;
    id
}
