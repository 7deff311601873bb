//! Event envelope and the closed set of event variants.
//!
//! Every variant maps to an [`EventTag`]. Tags form a static tree rooted at
//! [`EventTag::Event`]; a subscriber registered on a tag receives events of that tag
//! and of every tag below it.
//!
//! ```text
//! Event
//! ├── Task ──────── TaskSubmitted, TaskStarted, TaskRetrying,
//! │                 TaskCompleted, TaskFailed, TaskCancelled
//! ├── System ────── SystemStarted, SystemStopped, SystemError
//! ├── Notification
//! └── Data ──────── DataImported, AnalysisFinished, DataExported
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task_manager::{FailureKind, TaskId, TaskKind, TaskPriority};

/// Unique identifier for events
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Tag of an event variant, or of an abstract family of variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    Event,
    Task,
    TaskSubmitted,
    TaskStarted,
    TaskRetrying,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    System,
    SystemStarted,
    SystemStopped,
    SystemError,
    Notification,
    Data,
    DataImported,
    AnalysisFinished,
    DataExported,
}

impl EventTag {
    pub const ALL: [EventTag; 17] = [
        EventTag::Event,
        EventTag::Task,
        EventTag::TaskSubmitted,
        EventTag::TaskStarted,
        EventTag::TaskRetrying,
        EventTag::TaskCompleted,
        EventTag::TaskFailed,
        EventTag::TaskCancelled,
        EventTag::System,
        EventTag::SystemStarted,
        EventTag::SystemStopped,
        EventTag::SystemError,
        EventTag::Notification,
        EventTag::Data,
        EventTag::DataImported,
        EventTag::AnalysisFinished,
        EventTag::DataExported,
    ];

    /// Direct supertype in the tag tree; `None` only for the root
    pub const fn parent(self) -> Option<EventTag> {
        match self {
            EventTag::Event => None,
            EventTag::Task | EventTag::System | EventTag::Notification | EventTag::Data => {
                Some(EventTag::Event)
            }
            EventTag::TaskSubmitted
            | EventTag::TaskStarted
            | EventTag::TaskRetrying
            | EventTag::TaskCompleted
            | EventTag::TaskFailed
            | EventTag::TaskCancelled => Some(EventTag::Task),
            EventTag::SystemStarted | EventTag::SystemStopped | EventTag::SystemError => {
                Some(EventTag::System)
            }
            EventTag::DataImported | EventTag::AnalysisFinished | EventTag::DataExported => {
                Some(EventTag::Data)
            }
        }
    }

    /// This tag followed by each ancestor up to the root
    pub fn lineage(self) -> impl Iterator<Item = EventTag> {
        std::iter::successors(Some(self), |tag| tag.parent())
    }

    /// True when `self` equals `ancestor` or descends from it
    pub fn is_kind_of(self, ancestor: EventTag) -> bool {
        self.lineage().any(|tag| tag == ancestor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventTag::Event => "event",
            EventTag::Task => "task",
            EventTag::TaskSubmitted => "task.submitted",
            EventTag::TaskStarted => "task.started",
            EventTag::TaskRetrying => "task.retrying",
            EventTag::TaskCompleted => "task.completed",
            EventTag::TaskFailed => "task.failed",
            EventTag::TaskCancelled => "task.cancelled",
            EventTag::System => "system",
            EventTag::SystemStarted => "system.started",
            EventTag::SystemStopped => "system.stopped",
            EventTag::SystemError => "system.error",
            EventTag::Notification => "notification",
            EventTag::Data => "data",
            EventTag::DataImported => "data.imported",
            EventTag::AnalysisFinished => "data.analysis_finished",
            EventTag::DataExported => "data.exported",
        }
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TaskSubmitted {
        task_id: TaskId,
        name: String,
        kind: TaskKind,
        priority: TaskPriority,
    },
    TaskStarted {
        task_id: TaskId,
        name: String,
        worker_id: usize,
    },
    TaskRetrying {
        task_id: TaskId,
        name: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    TaskCompleted {
        task_id: TaskId,
        name: String,
        kind: TaskKind,
        attempts: u32,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: TaskId,
        name: String,
        kind: TaskKind,
        attempts: u32,
        failure: FailureKind,
        error: String,
    },
    TaskCancelled {
        task_id: TaskId,
        name: String,
    },
    SystemStarted {
        component: String,
    },
    SystemStopped {
        component: String,
    },
    SystemError {
        component: String,
        message: String,
    },
    Notification {
        level: NotificationLevel,
        title: String,
        message: String,
    },
    DataImported {
        dataset: String,
        rows: u64,
    },
    AnalysisFinished {
        dataset: String,
        analysis: String,
        findings: u64,
    },
    DataExported {
        dataset: String,
        destination: String,
    },
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            EventKind::TaskSubmitted { .. } => EventTag::TaskSubmitted,
            EventKind::TaskStarted { .. } => EventTag::TaskStarted,
            EventKind::TaskRetrying { .. } => EventTag::TaskRetrying,
            EventKind::TaskCompleted { .. } => EventTag::TaskCompleted,
            EventKind::TaskFailed { .. } => EventTag::TaskFailed,
            EventKind::TaskCancelled { .. } => EventTag::TaskCancelled,
            EventKind::SystemStarted { .. } => EventTag::SystemStarted,
            EventKind::SystemStopped { .. } => EventTag::SystemStopped,
            EventKind::SystemError { .. } => EventTag::SystemError,
            EventKind::Notification { .. } => EventTag::Notification,
            EventKind::DataImported { .. } => EventTag::DataImported,
            EventKind::AnalysisFinished { .. } => EventTag::AnalysisFinished,
            EventKind::DataExported { .. } => EventTag::DataExported,
        }
    }

    /// Priority an event of this kind gets unless the publisher overrides it
    pub fn default_priority(&self) -> EventPriority {
        match self {
            EventKind::TaskFailed { .. } | EventKind::SystemError { .. } => EventPriority::High,
            EventKind::Notification {
                level: NotificationLevel::Error,
                ..
            } => EventPriority::High,
            EventKind::TaskRetrying { .. } => EventPriority::Normal,
            EventKind::TaskStarted { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// Task the event is about, for task-family events
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            EventKind::TaskSubmitted { task_id, .. }
            | EventKind::TaskStarted { task_id, .. }
            | EventKind::TaskRetrying { task_id, .. }
            | EventKind::TaskCompleted { task_id, .. }
            | EventKind::TaskFailed { task_id, .. }
            | EventKind::TaskCancelled { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}

/// Envelope shared by all events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    /// Name of the component that published the event
    pub source: String,
    pub priority: EventPriority,
    pub metadata: HashMap<String, serde_json::Value>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(source: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            source: source.into(),
            priority: kind.default_priority(),
            metadata: HashMap::new(),
            kind,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self) -> EventTag {
        self.kind.tag()
    }

    pub fn is_kind_of(&self, ancestor: EventTag) -> bool {
        self.tag().is_kind_of(ancestor)
    }

    pub fn notification(
        source: impl Into<String>,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            source,
            EventKind::Notification {
                level,
                title: title.into(),
                message: message.into(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_reaches_root() {
        for tag in EventTag::ALL {
            assert_eq!(tag.lineage().last(), Some(EventTag::Event), "{tag}");
            assert!(tag.is_kind_of(EventTag::Event));
        }
    }

    #[test]
    fn test_lineage_of_task_failed() {
        let lineage: Vec<_> = EventTag::TaskFailed.lineage().collect();
        assert_eq!(
            lineage,
            vec![EventTag::TaskFailed, EventTag::Task, EventTag::Event]
        );
    }

    #[test]
    fn test_kind_of_is_not_symmetric() {
        assert!(EventTag::DataImported.is_kind_of(EventTag::Data));
        assert!(!EventTag::Data.is_kind_of(EventTag::DataImported));
        assert!(!EventTag::DataImported.is_kind_of(EventTag::Task));
        assert!(!EventTag::SystemError.is_kind_of(EventTag::Notification));
    }

    #[test]
    fn test_event_defaults_from_kind() {
        let event = Event::new(
            "task_scheduler",
            EventKind::TaskFailed {
                task_id: TaskId::new(),
                name: "export".to_string(),
                kind: TaskKind::Export,
                attempts: 3,
                failure: FailureKind::Timeout,
                error: "timeout".to_string(),
            },
        )
        .with_metadata("dataset", "run_12");

        assert_eq!(event.tag(), EventTag::TaskFailed);
        assert_eq!(event.priority, EventPriority::High);
        assert!(event.kind.task_id().is_some());
        assert_eq!(event.metadata["dataset"], serde_json::json!("run_12"));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::new(
            "csv_import",
            EventKind::DataImported {
                dataset: "pull_3.csv".to_string(),
                rows: 1200,
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "data_imported");
        assert_eq!(json["kind"]["rows"], 1200);
        assert_eq!(json["priority"], "NORMAL");
    }
}
