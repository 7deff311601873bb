use crate::events::{Event, EventBus, EventKind};
use crate::task_manager::handle::{TaskError, TaskRecord};

/// Source name stamped on every event the scheduler publishes
pub const SCHEDULER_SOURCE: &str = "task_scheduler";

/// Publishes task lifecycle events onto the bus the scheduler was wired to.
///
/// Without a bus every call is a no-op.
#[derive(Clone, Default)]
pub(crate) struct TaskEventPublisher {
    bus: Option<EventBus>,
}

impl TaskEventPublisher {
    pub fn new(bus: Option<EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }

    async fn publish(&self, kind: EventKind) {
        let Some(bus) = &self.bus else {
            return;
        };
        let tag = kind.tag();
        if let Err(error) = bus.publish(Event::new(SCHEDULER_SOURCE, kind)).await {
            tracing::debug!(error = %error, event = %tag, "Scheduler event not delivered");
        }
    }

    pub async fn submitted<T>(&self, record: &TaskRecord<T>) {
        self.publish(EventKind::TaskSubmitted {
            task_id: record.id,
            name: record.name.clone(),
            kind: record.kind,
            priority: record.priority,
        })
        .await
    }

    pub async fn started<T>(&self, record: &TaskRecord<T>, worker_id: usize) {
        self.publish(EventKind::TaskStarted {
            task_id: record.id,
            name: record.name.clone(),
            worker_id,
        })
        .await
    }

    pub async fn retrying<T>(&self, record: &TaskRecord<T>, error: &TaskError, delay_ms: u64) {
        self.publish(EventKind::TaskRetrying {
            task_id: record.id,
            name: record.name.clone(),
            attempt: error.attempt + 1,
            delay_ms,
            error: error.message.clone(),
        })
        .await
    }

    pub async fn completed<T>(&self, record: &TaskRecord<T>, attempts: u32, duration_ms: u64) {
        self.publish(EventKind::TaskCompleted {
            task_id: record.id,
            name: record.name.clone(),
            kind: record.kind,
            attempts,
            duration_ms,
        })
        .await
    }

    pub async fn failed<T>(&self, record: &TaskRecord<T>, attempts: u32, error: &TaskError) {
        self.publish(EventKind::TaskFailed {
            task_id: record.id,
            name: record.name.clone(),
            kind: record.kind,
            attempts,
            failure: error.failure,
            error: error.message.clone(),
        })
        .await
    }

    pub async fn cancelled<T>(&self, record: &TaskRecord<T>) {
        self.publish(EventKind::TaskCancelled {
            task_id: record.id,
            name: record.name.clone(),
        })
        .await
    }

    pub async fn system_started(&self) {
        self.publish(EventKind::SystemStarted {
            component: SCHEDULER_SOURCE.to_string(),
        })
        .await
    }

    pub async fn system_stopped(&self) {
        self.publish(EventKind::SystemStopped {
            component: SCHEDULER_SOURCE.to_string(),
        })
        .await
    }
}
