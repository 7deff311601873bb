use super::*;
use crate::task_manager::{FailureKind, TaskId, TaskKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn task_failed() -> Event {
    Event::new(
        "test",
        EventKind::TaskFailed {
            task_id: TaskId::new(),
            name: "export".to_string(),
            kind: TaskKind::Export,
            attempts: 1,
            failure: FailureKind::Execution,
            error: "disk full".to_string(),
        },
    )
}

fn data_imported(rows: u64) -> Event {
    Event::new(
        "test",
        EventKind::DataImported {
            dataset: "pull.csv".to_string(),
            rows,
        },
    )
}

/// Sync handler appending `label` to `calls`
fn recorder(calls: &Arc<Mutex<Vec<String>>>, label: &str) -> EventHandler {
    let calls = calls.clone();
    let label = label.to_string();
    EventHandler::sync(move |_event| {
        calls.lock().push(label.clone());
        Ok(())
    })
}

#[tokio::test]
async fn test_polymorphic_dispatch_once_in_priority_order() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe(EventTag::Event, recorder(&calls, "root"), "root", EventPriority::Low);
    bus.subscribe(EventTag::Task, recorder(&calls, "task"), "task", EventPriority::High);
    bus.subscribe(
        EventTag::TaskFailed,
        recorder(&calls, "failed"),
        "failed",
        EventPriority::Normal,
    );
    bus.subscribe(
        EventTag::TaskCompleted,
        recorder(&calls, "completed"),
        "completed",
        EventPriority::Critical,
    );
    bus.subscribe(EventTag::Data, recorder(&calls, "data"), "data", EventPriority::Critical);

    let report = bus.publish(task_failed()).await.unwrap();

    assert_eq!(report.tag, EventTag::TaskFailed);
    assert_eq!(report.matched, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(*calls.lock(), vec!["task", "failed", "root"]);
}

#[tokio::test]
async fn test_equal_priority_keeps_subscription_order() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe(EventTag::Data, recorder(&calls, "first"), "a", EventPriority::Normal);
    bus.subscribe(EventTag::Event, recorder(&calls, "second"), "b", EventPriority::Normal);
    bus.subscribe(EventTag::DataImported, recorder(&calls, "third"), "c", EventPriority::Normal);

    bus.publish(data_imported(10)).await.unwrap();

    assert_eq!(*calls.lock(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_failing_handlers_are_isolated() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe(
        EventTag::Task,
        EventHandler::sync(|_event| Err("handler rejected event".into())),
        "erroring",
        EventPriority::Critical,
    );
    bus.subscribe(
        EventTag::Task,
        EventHandler::sync(|_event| panic!("handler blew up")),
        "panicking",
        EventPriority::High,
    );
    bus.subscribe(EventTag::TaskFailed, recorder(&calls, "healthy"), "healthy", EventPriority::Low);

    let report = bus.publish(task_failed()).await.unwrap();

    assert_eq!(report.matched, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(*calls.lock(), vec!["healthy"]);

    let stats = bus.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn test_slow_sync_handler_times_out() {
    let bus = EventBus::with_config(EventBusConfig {
        handler_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    bus.subscribe(
        EventTag::Data,
        EventHandler::sync(|_event| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }),
        "slow",
        EventPriority::Normal,
    );

    let start = std::time::Instant::now();
    let report = bus.publish(data_imported(1)).await.unwrap();

    assert_eq!(report.failed, 1);
    assert!(start.elapsed() < Duration::from_millis(250));
    assert_eq!(bus.stats().failed, 1);
}

#[tokio::test]
async fn test_filter_drops_event_silently() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(EventTag::Event, recorder(&calls, "any"), "any", EventPriority::Normal);
    bus.add_filter(|event| !event.is_kind_of(EventTag::Notification));

    let report = bus
        .publish(Event::notification(
            "test",
            NotificationLevel::Info,
            "hello",
            "dropped",
        ))
        .await
        .unwrap();
    assert!(report.filtered);
    assert_eq!(report.matched, 0);

    bus.publish(data_imported(5)).await.unwrap();

    assert_eq!(*calls.lock(), vec!["any"]);
    let stats = bus.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.filter_count, 1);
    assert_eq!(bus.history(10, None).len(), 1);
}

#[tokio::test]
async fn test_middlewares_transform_in_order() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(None));

    bus.add_middleware(|event| event.with_metadata("stage", "first"));
    bus.add_middleware(|event| {
        let previous = event.metadata.get("stage").cloned();
        event
            .with_metadata("stage", "second")
            .with_metadata("previous", previous.unwrap_or_default())
    });
    {
        let seen = seen.clone();
        bus.subscribe(
            EventTag::Data,
            EventHandler::sync(move |event| {
                *seen.lock() = Some(event.metadata.clone());
                Ok(())
            }),
            "inspector",
            EventPriority::Normal,
        );
    }

    bus.publish(data_imported(3)).await.unwrap();

    let metadata = seen.lock().clone().expect("handler should run");
    assert_eq!(metadata["stage"], serde_json::json!("second"));
    assert_eq!(metadata["previous"], serde_json::json!("first"));
    assert_eq!(bus.stats().middleware_count, 2);
}

#[tokio::test]
async fn test_history_ring_is_bounded_and_filterable() {
    let bus = EventBus::with_config(EventBusConfig {
        history_size: 3,
        ..Default::default()
    });

    for rows in 0..4 {
        bus.publish(data_imported(rows)).await.unwrap();
    }
    bus.publish(task_failed().with_priority(EventPriority::Critical))
        .await
        .unwrap();

    let history = bus.history(10, None);
    assert_eq!(history.len(), 3);
    let last = history.last().unwrap();
    assert_eq!(last.tag(), EventTag::TaskFailed);
    assert_eq!(last.priority, EventPriority::Critical);

    let data = bus.history(10, Some(EventTag::Data));
    let rows: Vec<_> = data
        .iter()
        .map(|event| match &event.kind {
            EventKind::DataImported { rows, .. } => *rows,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(rows, vec![2, 3]);

    assert_eq!(bus.history(1, Some(EventTag::Data)).len(), 1);
    assert!(bus.history(10, Some(EventTag::System)).is_empty());

    bus.clear_history();
    assert!(bus.history(10, None).is_empty());
    assert_eq!(bus.stats().published, 5);
}

#[tokio::test]
async fn test_async_handler_runs_detached() {
    let bus = EventBus::new();
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));

    bus.subscribe(
        EventTag::System,
        EventHandler::asynchronous(move |event| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event.source.clone());
                }
                Ok(())
            }
        }),
        "async_listener",
        EventPriority::Normal,
    );

    let report = bus
        .publish(Event::new(
            "scheduler",
            EventKind::SystemStarted {
                component: "scheduler".to_string(),
            },
        ))
        .await
        .unwrap();
    assert_eq!(report.spawned, 1);
    assert_eq!(report.delivered, 0);

    let source = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("async handler should finish")
        .unwrap();
    assert_eq!(source, "scheduler");

    bus.shutdown().await;
    assert_eq!(bus.stats().processed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_sync_from_blocking_thread() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(EventTag::Data, recorder(&calls, "sync"), "sync", EventPriority::Normal);

    let publisher = bus.clone();
    let report = tokio::task::spawn_blocking(move || publisher.publish_sync(data_imported(7)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(*calls.lock(), vec!["sync"]);
    assert_eq!(bus.history(10, None).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_variants() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let handle = bus.subscribe(EventTag::Data, recorder(&calls, "a"), "alpha", EventPriority::Normal);
    bus.subscribe(EventTag::Task, recorder(&calls, "b"), "alpha", EventPriority::Normal);
    bus.subscribe(EventTag::Task, recorder(&calls, "c"), "beta", EventPriority::Normal);
    bus.subscribe(EventTag::System, recorder(&calls, "d"), "beta", EventPriority::Normal);

    assert_eq!(bus.subscribers(None).len(), 4);
    assert_eq!(bus.subscribers(Some(EventTag::Task)).len(), 2);

    assert!(bus.unsubscribe_handle(&handle));
    assert!(!bus.unsubscribe_handle(&handle));
    assert_eq!(bus.unsubscribe(EventTag::Task, "alpha"), 1);
    assert_eq!(bus.unsubscribe(EventTag::Task, "alpha"), 0);
    assert_eq!(bus.unsubscribe_all("beta"), 2);

    assert!(bus.subscribers(None).is_empty());
    assert_eq!(bus.stats().subscriptions, 0);
}

#[tokio::test]
async fn test_publish_after_shutdown_fails() {
    let bus = EventBus::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(EventTag::Event, recorder(&calls, "any"), "any", EventPriority::Normal);

    bus.publish(data_imported(1)).await.unwrap();
    bus.shutdown().await;

    assert_eq!(bus.publish(data_imported(2)).await, Err(BusError::ShutDown));
    assert!(bus.subscribers(None).is_empty());
    assert!(bus.stats().is_shut_down);
    assert_eq!(bus.history(10, None).len(), 1);
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test]
async fn test_event_logger_receives_everything() {
    let bus = EventBus::new();
    let handle = attach_event_logger(&bus, "event_logger");

    let report = bus.publish(task_failed()).await.unwrap();
    assert_eq!(report.delivered, 1);

    let report = bus.publish(data_imported(2)).await.unwrap();
    assert_eq!(report.delivered, 1);

    assert_eq!(handle.tag, EventTag::Event);
    assert_eq!(bus.subscribers(Some(EventTag::Event))[0].subscriber_id, "event_logger");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_handler_can_publish_sync() {
    let bus = EventBus::with_config(EventBusConfig {
        handler_timeout: Duration::from_millis(500),
        ..Default::default()
    });
    let calls = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(EventTag::TaskFailed, recorder(&calls, "failed"), "alerts", EventPriority::Normal);

    let nested = bus.clone();
    bus.subscribe(
        EventTag::DataImported,
        EventHandler::sync(move |_event| {
            let report = nested.publish_sync(task_failed())?;
            assert_eq!(report.delivered, 1);
            Ok(())
        }),
        "importer",
        EventPriority::Normal,
    );

    let publisher = bus.clone();
    let started = std::time::Instant::now();
    let report = tokio::task::spawn_blocking(move || publisher.publish_sync(data_imported(3)))
        .await
        .unwrap()
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(*calls.lock(), vec!["failed"]);

    let stats = bus.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.processed, 2);
}
