use crate::events::bus::EventBus;
use crate::events::event::{Event, EventPriority, EventTag};
use crate::events::subscription::{EventHandler, SubscriptionHandle};

/// Subscribe a handler that writes every event to the tracing log, at a level picked
/// from the event's priority.
///
/// Registered on the root tag with `Low` priority so it runs after the other handlers.
pub fn attach_event_logger(bus: &EventBus, subscriber_id: &str) -> SubscriptionHandle {
    bus.subscribe(
        EventTag::Event,
        EventHandler::sync(|event: &Event| {
            log_event(event);
            Ok(())
        }),
        subscriber_id,
        EventPriority::Low,
    )
}

fn log_event(event: &Event) {
    let payload = serde_json::to_string(&event.kind).unwrap_or_default();

    match event.priority {
        EventPriority::Low => tracing::debug!(
            event_id = %event.id,
            event = %event.tag(),
            source = %event.source,
            payload = %payload,
            "Event"
        ),
        EventPriority::Normal => tracing::info!(
            event_id = %event.id,
            event = %event.tag(),
            source = %event.source,
            payload = %payload,
            "Event"
        ),
        EventPriority::High => tracing::warn!(
            event_id = %event.id,
            event = %event.tag(),
            source = %event.source,
            payload = %payload,
            "Event"
        ),
        EventPriority::Critical => tracing::error!(
            event_id = %event.id,
            event = %event.tag(),
            source = %event.source,
            payload = %payload,
            "Event"
        ),
    }
}
