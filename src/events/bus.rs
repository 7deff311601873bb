//! Publish/subscribe bus with tag-hierarchy dispatch.
//!
//! A publish runs the middleware chain, then the filters, records the event in the
//! history ring and dispatches it to every subscription on the event's tag or on any
//! ancestor tag, highest subscription priority first. Handler failures are counted and
//! logged; they never reach the publisher or the other handlers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::task::TaskTracker;

use crate::events::config::EventBusConfig;
use crate::events::error::BusError;
use crate::events::event::{Event, EventId, EventPriority, EventTag};
use crate::events::subscription::{
    AsyncHandlerFn, EventFilter, EventHandler, EventSubscription, Middleware, SubscriberInfo,
    SubscriptionHandle, SyncHandlerFn,
};

/// What a single publish did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub event_id: EventId,
    pub tag: EventTag,
    /// Subscriptions the event was dispatched to
    pub matched: usize,
    /// Sync handlers that returned `Ok`
    pub delivered: usize,
    /// Sync handlers that errored, panicked or timed out
    pub failed: usize,
    /// Async handlers spawned; their outcome only shows up in `BusStats`
    pub spawned: usize,
    /// True when a filter dropped the event
    pub filtered: bool,
}

impl PublishReport {
    fn new(event: &Event, matched: usize) -> Self {
        Self {
            event_id: event.id,
            tag: event.tag(),
            matched,
            delivered: 0,
            failed: 0,
            spawned: 0,
            filtered: false,
        }
    }
}

/// Statistics for bus monitoring
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    /// Events accepted by `publish`, filtered ones included
    pub published: u64,
    /// Handler invocations that completed successfully
    pub processed: u64,
    /// Handler invocations that errored, panicked or timed out
    pub failed: u64,
    /// Events dropped by a filter
    pub filtered: u64,
    pub subscriptions: usize,
    pub subscriptions_by_tag: BTreeMap<EventTag, usize>,
    pub history_len: usize,
    pub middleware_count: usize,
    pub filter_count: usize,
    /// Async handlers still running
    pub in_flight: usize,
    pub is_shut_down: bool,
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    filtered: AtomicU64,
}

impl BusCounters {
    /// Count a settled handler call; returns true on success
    fn settle(&self, subscriber_id: &str, tag: EventTag, error: Option<String>) -> bool {
        match error {
            None => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscriber_id = subscriber_id,
                    event = %tag,
                    error = %error,
                    "Event handler failed"
                );
                false
            }
        }
    }
}

struct DispatchRequest {
    event: Event,
    reply: oneshot::Sender<Result<PublishReport, BusError>>,
}

struct BusInner {
    config: EventBusConfig,
    subscriptions: RwLock<HashMap<EventTag, Vec<Arc<EventSubscription>>>>,
    middlewares: RwLock<Vec<Middleware>>,
    filters: RwLock<Vec<EventFilter>>,
    history: Mutex<VecDeque<Event>>,
    sequence: AtomicU64,
    counters: Arc<BusCounters>,
    dispatch_pool: Arc<Semaphore>,
    tracker: TaskTracker,
    dispatcher: Mutex<Option<mpsc::UnboundedSender<DispatchRequest>>>,
    shut_down: AtomicBool,
}

/// Cloneable handle to one event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("is_shut_down", &self.is_shut_down())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus. When called inside a tokio runtime the `publish_sync` dispatcher is
    /// spawned on it; otherwise `publish_sync` reports `DispatcherUnavailable`.
    pub fn with_config(config: EventBusConfig) -> Self {
        let inner = Arc::new(BusInner {
            subscriptions: RwLock::new(HashMap::new()),
            middlewares: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(config.history_size.min(1024))),
            sequence: AtomicU64::new(0),
            counters: Arc::new(BusCounters::default()),
            dispatch_pool: Arc::new(Semaphore::new(config.dispatch_pool_size.max(1))),
            tracker: TaskTracker::new(),
            dispatcher: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            config,
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let (sender, receiver) = mpsc::unbounded_channel();
                runtime.spawn(dispatcher_loop(Arc::downgrade(&inner), receiver));
                *inner.dispatcher.lock() = Some(sender);
            }
            Err(_) => {
                tracing::warn!("Event bus created outside a tokio runtime, publish_sync disabled");
            }
        }

        Self { inner }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Register `handler` for events of `tag` and of every tag below it
    pub fn subscribe(
        &self,
        tag: EventTag,
        handler: EventHandler,
        subscriber_id: impl Into<String>,
        priority: EventPriority,
    ) -> SubscriptionHandle {
        let subscription = Arc::new(EventSubscription {
            tag,
            subscriber_id: subscriber_id.into(),
            priority,
            handler,
            created_at: Utc::now(),
            sequence: self.inner.sequence.fetch_add(1, Ordering::Relaxed),
        });
        let handle = SubscriptionHandle {
            tag,
            subscriber_id: subscription.subscriber_id.clone(),
            sequence: subscription.sequence,
        };

        {
            let mut subscriptions = self.inner.subscriptions.write();
            let list = subscriptions.entry(tag).or_default();
            let key = subscription.dispatch_key();
            let position = list.partition_point(|existing| existing.dispatch_key() <= key);
            list.insert(position, subscription);
        }

        tracing::debug!(
            subscriber_id = %handle.subscriber_id,
            event = %tag,
            priority = ?priority,
            "Subscribed to events"
        );
        handle
    }

    /// Remove `subscriber_id`'s subscriptions on exactly `tag`. Returns how many went.
    pub fn unsubscribe(&self, tag: EventTag, subscriber_id: &str) -> usize {
        let mut subscriptions = self.inner.subscriptions.write();
        let Some(list) = subscriptions.get_mut(&tag) else {
            return 0;
        };
        let before = list.len();
        list.retain(|subscription| subscription.subscriber_id != subscriber_id);
        let removed = before - list.len();
        if list.is_empty() {
            subscriptions.remove(&tag);
        }
        removed
    }

    /// Remove a single registration
    pub fn unsubscribe_handle(&self, handle: &SubscriptionHandle) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        let Some(list) = subscriptions.get_mut(&handle.tag) else {
            return false;
        };
        let before = list.len();
        list.retain(|subscription| subscription.sequence != handle.sequence);
        let removed = list.len() != before;
        if list.is_empty() {
            subscriptions.remove(&handle.tag);
        }
        removed
    }

    /// Remove every subscription of `subscriber_id`, whatever its tag
    pub fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let mut subscriptions = self.inner.subscriptions.write();
        let mut removed = 0;
        for list in subscriptions.values_mut() {
            let before = list.len();
            list.retain(|subscription| subscription.subscriber_id != subscriber_id);
            removed += before - list.len();
        }
        subscriptions.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.inner.middlewares.write().push(Arc::new(middleware));
    }

    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.inner.filters.write().push(Arc::new(filter));
    }

    /// Publish an event and wait for its sync handlers.
    ///
    /// Async handlers are spawned and not awaited. Fails only when the bus was shut
    /// down; handler failures are reported in the returned `PublishReport`.
    pub async fn publish(&self, event: Event) -> Result<PublishReport, BusError> {
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }

        let event = self.apply_middlewares(event);
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);

        if !self.passes_filters(&event) {
            self.inner.counters.filtered.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(event_id = %event.id, event = %event.tag(), "Event filtered out");
            let mut report = PublishReport::new(&event, 0);
            report.filtered = true;
            return Ok(report);
        }

        self.record_history(&event);

        let targets = self.dispatch_set(event.tag());
        let mut report = PublishReport::new(&event, targets.len());
        let event = Arc::new(event);

        for subscription in &targets {
            match &subscription.handler {
                EventHandler::Sync(handler) => {
                    if self
                        .call_sync(subscription, handler.clone(), event.clone())
                        .await
                    {
                        report.delivered += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                EventHandler::Async(handler) => {
                    self.spawn_async(subscription, handler.clone(), Event::clone(&event));
                    report.spawned += 1;
                }
            }
        }

        tracing::trace!(
            event_id = %report.event_id,
            event = %report.tag,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            spawned = report.spawned,
            "Event published"
        );
        Ok(report)
    }

    /// Blocking publish for callers outside the async context.
    ///
    /// The event is handed to the bus's dispatcher task and this thread blocks until
    /// the publish finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async execution context; use `publish` there,
    /// or call this from `spawn_blocking`.
    pub fn publish_sync(&self, event: Event) -> Result<PublishReport, BusError> {
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }
        let sender = self
            .inner
            .dispatcher
            .lock()
            .clone()
            .ok_or(BusError::DispatcherUnavailable)?;

        let (reply, response) = oneshot::channel();
        sender
            .send(DispatchRequest { event, reply })
            .map_err(|_| BusError::DispatcherUnavailable)?;
        response
            .blocking_recv()
            .map_err(|_| BusError::DispatcherUnavailable)?
    }

    /// Up to `limit` most recent events, optionally restricted to `tag` and the tags
    /// below it, oldest first
    pub fn history(&self, limit: usize, tag: Option<EventTag>) -> Vec<Event> {
        let history = self.inner.history.lock();
        let mut matching: Vec<Event> = history
            .iter()
            .rev()
            .filter(|event| tag.is_none_or(|tag| event.is_kind_of(tag)))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    /// Subscriptions registered on exactly `tag`, or all of them, in dispatch order
    pub fn subscribers(&self, tag: Option<EventTag>) -> Vec<SubscriberInfo> {
        let subscriptions = self.inner.subscriptions.read();
        let mut found: Vec<&Arc<EventSubscription>> = match tag {
            Some(tag) => subscriptions.get(&tag).into_iter().flatten().collect(),
            None => subscriptions.values().flatten().collect(),
        };
        found.sort_by_key(|subscription| subscription.dispatch_key());
        found.into_iter().map(|subscription| subscription.info()).collect()
    }

    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        let subscriptions_by_tag: BTreeMap<EventTag, usize> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .map(|(tag, list)| (*tag, list.len()))
            .collect();

        BusStats {
            published: counters.published.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            filtered: counters.filtered.load(Ordering::Relaxed),
            subscriptions: subscriptions_by_tag.values().sum(),
            subscriptions_by_tag,
            history_len: self.inner.history.lock().len(),
            middleware_count: self.inner.middlewares.read().len(),
            filter_count: self.inner.filters.read().len(),
            in_flight: self.inner.tracker.len(),
            is_shut_down: self.is_shut_down(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop accepting events, wait up to the drain timeout for async handlers, then
    /// drop every subscription, middleware and filter. History is kept.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down event bus");

        self.inner.dispatcher.lock().take();
        self.inner.tracker.close();

        let in_flight = self.inner.tracker.len();
        let drain_timeout = self.inner.config.drain_timeout;
        if tokio::time::timeout(drain_timeout, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = self.inner.tracker.len(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Event handlers still running after drain timeout"
            );
        }

        let subscriptions = {
            let mut subscriptions = self.inner.subscriptions.write();
            let count = subscriptions.values().map(Vec::len).sum::<usize>();
            subscriptions.clear();
            count
        };
        self.inner.middlewares.write().clear();
        self.inner.filters.write().clear();

        let stats = self.stats();
        tracing::info!(
            drained = in_flight,
            cleared_subscriptions = subscriptions,
            published = stats.published,
            processed = stats.processed,
            failed = stats.failed,
            "Event bus shut down"
        );
    }

    fn apply_middlewares(&self, event: Event) -> Event {
        let middlewares = self.inner.middlewares.read().clone();
        middlewares
            .iter()
            .fold(event, |event, middleware| middleware(event))
    }

    fn passes_filters(&self, event: &Event) -> bool {
        let filters = self.inner.filters.read().clone();
        filters.iter().all(|filter| filter(event))
    }

    fn record_history(&self, event: &Event) {
        let limit = self.inner.config.history_size;
        if limit == 0 {
            return;
        }
        let mut history = self.inner.history.lock();
        history.push_back(event.clone());
        while history.len() > limit {
            history.pop_front();
        }
    }

    /// Subscriptions on `tag` and its ancestors, in dispatch order
    fn dispatch_set(&self, tag: EventTag) -> Vec<Arc<EventSubscription>> {
        let subscriptions = self.inner.subscriptions.read();
        let mut targets: Vec<Arc<EventSubscription>> = tag
            .lineage()
            .filter_map(|tag| subscriptions.get(&tag))
            .flatten()
            .cloned()
            .collect();
        targets.sort_by_key(|subscription| subscription.dispatch_key());
        targets
    }

    /// Run a sync handler on the blocking pool. The pool permit travels with the call,
    /// so an abandoned call keeps its slot until it really returns.
    async fn call_sync(
        &self,
        subscription: &EventSubscription,
        handler: SyncHandlerFn,
        event: Arc<Event>,
    ) -> bool {
        let tag = event.tag();
        let permit = match self.inner.dispatch_pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.inner.counters.settle(
                    &subscription.subscriber_id,
                    tag,
                    Some("dispatch pool closed".to_string()),
                );
            }
        };

        let call = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            handler(event.as_ref())
        });

        let handler_timeout = self.inner.config.handler_timeout;
        let error = match tokio::time::timeout(handler_timeout, call).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(error))) => Some(error.to_string()),
            Ok(Err(join_error)) => Some(format!("handler panicked: {join_error}")),
            Err(_) => Some(format!(
                "handler exceeded {}ms",
                handler_timeout.as_millis()
            )),
        };
        self.inner
            .counters
            .settle(&subscription.subscriber_id, tag, error)
    }

    fn spawn_async(&self, subscription: &EventSubscription, handler: AsyncHandlerFn, event: Event) {
        let counters = self.inner.counters.clone();
        let subscriber_id = subscription.subscriber_id.clone();
        let tag = event.tag();

        self.inner.tracker.spawn(async move {
            let outcome = AssertUnwindSafe(async move { handler(event).await })
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error.to_string()),
                Err(_) => Some("handler panicked".to_string()),
            };
            counters.settle(&subscriber_id, tag, error);
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `publish_sync` requests. Holds only a weak reference so dropping the last
/// `EventBus` handle closes the channel and ends the loop.
///
/// Each request is published on its own tracked task, so a sync handler that calls
/// `publish_sync` itself is served while its own dispatch is still running.
async fn dispatcher_loop(bus: Weak<BusInner>, mut requests: mpsc::UnboundedReceiver<DispatchRequest>) {
    while let Some(DispatchRequest { event, reply }) = requests.recv().await {
        let Some(inner) = bus.upgrade() else {
            let _ = reply.send(Err(BusError::ShutDown));
            break;
        };
        let tracker = inner.tracker.clone();
        let bus = EventBus { inner };
        tracker.spawn(async move {
            let result = bus.publish(event).await;
            let _ = reply.send(result);
        });
    }
    tracing::debug!("Event dispatcher stopped");
}
