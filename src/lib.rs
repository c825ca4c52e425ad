//! lockweave
//!
//! A priority-driven task executor for in-process concurrent workloads.
//! Tasks carry a priority (0 = highest) and a set of [`LockToken`]s; a fixed
//! pool of worker threads runs them so that ready tasks start in priority
//! order and no two tasks sharing a token ever overlap.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockweave::{ExecutorConfig, ExecutorManager, LockToken, TaskBuilder};
//!
//! fn main() -> anyhow::Result<()> {
//!     let executor = ExecutorManager::new(ExecutorConfig::default().with_worker_threads(4))?;
//!     let db = LockToken::named("db");
//!
//!     for i in 0..8 {
//!         let task = TaskBuilder::new()
//!             .priority(i % 3)
//!             .lock(db.clone())
//!             .build(move || println!("writing batch {i}"));
//!         executor.schedule(Arc::new(task))?;
//!     }
//!
//!     executor.schedule_fn(|| println!("lock-free work"), 0)?;
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

// Re-exports
pub use runtime::scheduler::{
    DynamicPriorityQueue, EngineError, EngineResult, ExecutorManager, ExecutorStats, LockRelease,
    LockToken, PriorityExecutor, QueueError, SimpleTask, Task, TaskBuilder, TaskFailure, TaskRef,
    WorkerState,
};
pub use runtime::sync::{
    BusyReferenceCounter, Cancellable, CancellationSignaller, Completion, ObjectPool,
    SingleAssignmentMap,
};
pub use util::config::ExecutorConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
