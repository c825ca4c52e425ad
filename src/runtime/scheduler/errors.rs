//! Scheduler errors

use thiserror::Error;

use super::task::LockToken;
use crate::util::config::ConfigError;

/// Scheduler result
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by [`DynamicPriorityQueue`](super::DynamicPriorityQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Priority levels must be positive")]
    InvalidLevels,

    #[error("Element already exists in the queue")]
    DuplicateElement,

    #[error("Priority out of range: {priority} (levels: {levels})")]
    PriorityOutOfRange {
        /// The rejected priority
        priority: usize,
        /// Number of configured levels
        levels: usize,
    },
}

/// Errors raised by the executor manager and its lock coordinator.
///
/// Every variant except [`EngineError::Spawn`] and [`EngineError::ShutDown`]
/// signals a broken caller contract rather than a recoverable condition.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Lock not found: {0}")]
    LockNotHeld(LockToken),

    #[error("Inconsistent lock listener state")]
    InconsistentWaiters,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Executor has been shut down")]
    ShutDown,
}
