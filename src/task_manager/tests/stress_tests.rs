use super::super::*;
use super::{fast_config, started};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_many_workers() {
    let config = SchedulerConfig {
        max_queue_size: 500,
        ..fast_config(8)
    };
    let scheduler: TaskScheduler<usize> = started(config).await;
    let executed = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for index in 0..200usize {
        let executed = executed.clone();
        let priority = match index % 3 {
            0 => TaskPriority::Low,
            1 => TaskPriority::Normal,
            _ => TaskPriority::High,
        };
        let id = scheduler
            .submit(
                TaskSpec::new(format!("stress_{index}"), TaskKind::User, move |_ctx| {
                    let executed = executed.clone();
                    async move {
                        sleep(Duration::from_millis(1)).await;
                        executed.fetch_add(1, Ordering::SeqCst);
                        Ok(index)
                    }
                })
                .priority(priority),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    for (index, id) in ids.iter().enumerate() {
        let outcome = scheduler
            .wait(id, Some(Duration::from_secs(10)))
            .await
            .expect("task should finish");
        assert_eq!(outcome.value, Some(index));
    }
    assert_eq!(executed.load(Ordering::SeqCst), 200);

    let status = scheduler.shutdown().await;
    assert!(status.completed_gracefully);

    let stats = scheduler.statistics();
    let processed: u64 = stats.workers.iter().map(|w| w.tasks_processed()).sum();
    assert_eq!(processed, 200);
    assert_eq!(stats.by_status[&TaskStatus::Completed], 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_share_scheduler() {
    let scheduler: TaskScheduler<()> = started(fast_config(4)).await;

    let mut submitters = tokio::task::JoinSet::new();
    for submitter in 0..4 {
        let scheduler = scheduler.clone();
        submitters.spawn(async move {
            let mut ids = Vec::new();
            for index in 0..25 {
                let id = scheduler
                    .submit(TaskSpec::new(
                        format!("submitter_{submitter}_{index}"),
                        TaskKind::CsvImport,
                        |_ctx| async { Ok(()) },
                    ))
                    .await
                    .unwrap();
                ids.push(id);
            }
            ids
        });
    }

    let mut all_ids = Vec::new();
    while let Some(ids) = submitters.join_next().await {
        all_ids.extend(ids.unwrap());
    }
    assert_eq!(all_ids.len(), 100);

    for id in &all_ids {
        assert!(
            scheduler
                .wait(id, Some(Duration::from_secs(10)))
                .await
                .unwrap()
                .success
        );
    }
    assert_eq!(scheduler.statistics().by_kind[&TaskKind::CsvImport], 100);
}

#[tokio::test]
async fn test_mixed_outcomes_under_load() {
    let scheduler: TaskScheduler<()> = started(fast_config(4)).await;

    let mut ids = Vec::new();
    for index in 0..40u32 {
        let id = scheduler
            .submit(
                TaskSpec::new(format!("mixed_{index}"), TaskKind::Analysis, move |_ctx| async move {
                    if index % 4 == 0 {
                        Err(format!("row {index} malformed").into())
                    } else {
                        Ok(())
                    }
                })
                .retries(1)
                .retry_delay(Duration::from_millis(1)),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    for id in &ids {
        scheduler.wait(id, Some(Duration::from_secs(5))).await.unwrap();
    }

    let stats = scheduler.statistics();
    assert_eq!(stats.by_status[&TaskStatus::Failed], 10);
    assert_eq!(stats.by_status[&TaskStatus::Completed], 30);
    assert_eq!(stats.active_count, 0);
}
