use std::time::Duration;

/// Configuration for event bus behavior
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Number of events kept in the history ring buffer
    pub history_size: usize,
    /// Maximum number of sync handlers running at once on the blocking pool
    pub dispatch_pool_size: usize,
    /// Per-call limit for a sync handler; the call is abandoned, not killed
    pub handler_timeout: Duration,
    /// How long `shutdown()` waits for in-flight async handlers
    pub drain_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_size: 1000,
            dispatch_pool_size: 4,
            handler_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        }
    }
}
