//! Scheduler unit tests
//!
//! Covers the priority queue, the lock-token protocol (driven by hand on an
//! executor without workers) and the threaded executor.


use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::runtime::scheduler::{ExecutorManager, LockToken, SimpleTask, TaskBuilder};

/// Upper bound for anything a test waits on.
pub(super) const TIMEOUT: Duration = Duration::from_secs(10);

/// Poll `condition` until it holds or [`TIMEOUT`] elapses.
pub(super) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// An executor whose tasks are only run when a test polls them.
pub(super) fn idle_manager() -> ExecutorManager {
    ExecutorManager::with_workers(0).expect("executor without workers")
}

/// A no-op task needing `tokens` at `priority`.
pub(super) fn locked(
    priority: usize,
    tokens: &[LockToken],
) -> Arc<SimpleTask> {
    Arc::new(
        TaskBuilder::new()
            .priority(priority)
            .locks(tokens.iter().cloned())
            .build(|| {}),
    )
}
