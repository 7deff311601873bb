use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus was shut down; nothing is recorded or dispatched
    #[error("event bus has been shut down")]
    ShutDown,

    /// `publish_sync` needs the dispatcher task, which only exists when the bus was
    /// created inside a tokio runtime
    #[error("event bus dispatcher is not available")]
    DispatcherUnavailable,
}
