use std::cmp::Reverse;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::events::event::{Event, EventPriority, EventTag};
use crate::task_manager::BoxError;

/// Result returned by every event handler
pub type HandlerResult = Result<(), BoxError>;

pub type SyncHandlerFn = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;
pub type AsyncHandlerFn = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Rewrites an event before it is filtered, recorded and dispatched
pub type Middleware = Arc<dyn Fn(Event) -> Event + Send + Sync>;

/// Returns false to drop an event before dispatch
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Callable invoked for every event a subscription matches.
///
/// Sync handlers run on the bus's bounded blocking pool and are awaited by `publish`;
/// async handlers are spawned and left to finish on their own.
#[derive(Clone)]
pub enum EventHandler {
    Sync(SyncHandlerFn),
    Async(AsyncHandlerFn),
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventHandler::Sync(_) => f.write_str("EventHandler::Sync(<function>)"),
            EventHandler::Async(_) => f.write_str("EventHandler::Async(<function>)"),
        }
    }
}

impl EventHandler {
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Sync(Arc::new(handler))
    }

    pub fn asynchronous<F, Fut>(handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        EventHandler::Async(Arc::new(move |event| handler(event).boxed()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, EventHandler::Async(_))
    }
}

/// A handler registered on one tag
#[derive(Debug)]
pub struct EventSubscription {
    pub tag: EventTag,
    pub subscriber_id: String,
    pub priority: EventPriority,
    pub handler: EventHandler,
    pub created_at: DateTime<Utc>,
    pub(crate) sequence: u64,
}

impl EventSubscription {
    pub fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            subscriber_id: self.subscriber_id.clone(),
            tag: self.tag,
            priority: self.priority,
            is_async: self.handler.is_async(),
            created_at: self.created_at,
        }
    }

    /// Dispatch order: higher priority first, then older subscriptions
    pub(crate) fn dispatch_key(&self) -> (Reverse<EventPriority>, u64) {
        (Reverse(self.priority), self.sequence)
    }
}

/// Returned by `EventBus::subscribe`; identifies the registration for unsubscribing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub tag: EventTag,
    pub subscriber_id: String,
    pub sequence: u64,
}

/// Serializable description of a subscription
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub subscriber_id: String,
    pub tag: EventTag,
    pub priority: EventPriority,
    pub is_async: bool,
    pub created_at: DateTime<Utc>,
}
