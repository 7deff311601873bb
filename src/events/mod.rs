// Event Bus Module - in-process publish/subscribe
//
// - Closed set of event variants arranged in a static tag hierarchy
// - Subscriptions on a tag also receive every event below it
// - Middleware chain and filters applied before dispatch
// - Sync handlers on a bounded blocking pool, async handlers spawned and tracked
// - Bounded event history and delivery statistics

pub mod event;
pub mod subscription;
pub mod config;
pub mod error;
pub mod bus;
pub mod logger;

pub use event::{Event, EventId, EventKind, EventPriority, EventTag, NotificationLevel};
pub use subscription::{
    AsyncHandlerFn, EventFilter, EventHandler, EventSubscription, HandlerResult, Middleware,
    SubscriberInfo, SubscriptionHandle, SyncHandlerFn,
};
pub use config::EventBusConfig;
pub use error::BusError;
pub use bus::{BusStats, EventBus, PublishReport};
pub use logger::attach_event_logger;

#[cfg(test)]
mod tests;
