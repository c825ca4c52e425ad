//! Worker threads.
//!
//! Each worker repeatedly asks the shared executor state for a task that is
//! both queued and lock-free, runs it, and makes sure its locks are released
//! exactly once. When nothing is runnable it parks on the executor's monitor
//! until a submission, a lock release, or shutdown wakes it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};

use tracing::{debug, error, trace, warn};

use super::errors::EngineResult;
use super::task::{FailureCause, TaskFailure, TaskRef};
use super::Shared;
use crate::util::panic_message;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Polling for or executing tasks.
    Running,
    /// Waiting on the monitor for new work.
    Parked,
    /// Exited after observing shutdown.
    Shutdown,
}

impl WorkerState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => WorkerState::Running,
            1 => WorkerState::Parked,
            _ => WorkerState::Shutdown,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            WorkerState::Running => 0,
            WorkerState::Parked => 1,
            WorkerState::Shutdown => 2,
        }
    }
}

/// Atomically readable worker state shared with the manager.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Running.as_u8()))
    }

    #[inline]
    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set(
        &self,
        state: WorkerState,
    ) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Handle through which a running task gives back its locks.
///
/// Releasing is idempotent: only the first call reaches the lock table.
pub struct LockRelease<'a> {
    shared: &'a Shared,
    task: &'a TaskRef,
    released: AtomicBool,
}

impl<'a> LockRelease<'a> {
    pub(crate) fn new(
        shared: &'a Shared,
        task: &'a TaskRef,
    ) -> Self {
        Self {
            shared,
            task,
            released: AtomicBool::new(false),
        }
    }

    /// Release the task's locks and requeue the tasks waiting on them.
    pub fn release(&self) -> EngineResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.release_locks(self.task)
    }

    /// Check whether the locks have been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LockRelease<'_> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LockRelease")
            .field("task", self.task)
            .field("released", &self.is_released())
            .finish()
    }
}

/// One executor worker.
pub(crate) struct WorkerThread {
    index: usize,
    shared: Arc<Shared>,
    state: Arc<StateCell>,
}

impl WorkerThread {
    pub(crate) fn new(
        index: usize,
        shared: Arc<Shared>,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            index,
            shared,
            state,
        }
    }

    /// Worker main loop.
    pub(crate) fn run(self) {
        debug!(worker = self.index, "worker started");

        loop {
            if self.shared.is_shutdown() {
                break;
            }

            if self.poll_and_execute() {
                continue;
            }

            let mut monitor = self.shared.monitor.lock();
            if self.shared.is_shutdown() || self.shared.has_pending_tasks() {
                continue;
            }

            self.state.set(WorkerState::Parked);
            self.shared.stats.record_park();
            trace!(worker = self.index, "worker parked");
            self.shared.wake.wait(&mut monitor);
            self.state.set(WorkerState::Running);
        }

        self.state.set(WorkerState::Shutdown);
        debug!(worker = self.index, "worker stopped");
    }

    /// Run one executable task, if any. Returns whether a task ran.
    fn poll_and_execute(&self) -> bool {
        match self.shared.poll_executable_task() {
            Some(task) => {
                self.execute(task);
                true
            }
            None => false,
        }
    }

    /// Run one claimed task, release its locks and report any failure.
    pub(crate) fn execute(
        &self,
        task: TaskRef,
    ) {
        let release = LockRelease::new(&self.shared, &task);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(&release)));
        let mut failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(TaskFailure::new(FailureCause::Error(error))),
            Err(payload) => Some(TaskFailure::from_panic(payload)),
        };

        // No-op when the body already released.
        if let Err(release_error) = release.release() {
            match failure.as_mut() {
                Some(failure) => {
                    error!(
                        worker = self.index,
                        error = %failure,
                        release_error = %release_error,
                        "Error while releasing locks"
                    );
                    failure.add_suppressed(release_error);
                }
                None => {
                    error!(worker = self.index, error = %release_error, "Error while releasing locks");
                    failure = Some(TaskFailure::new(FailureCause::Error(release_error.into())));
                }
            }
        }

        let Some(failure) = failure else {
            self.shared.stats.record_executed();
            return;
        };

        self.shared.stats.record_failed();
        warn!(worker = self.index, error = %failure, "task failed");

        let propagated =
            panic::catch_unwind(AssertUnwindSafe(|| task.propagate_failure(failure)));
        if let Err(payload) = propagated {
            error!(
                worker = self.index,
                panic = %panic_message(payload.as_ref()),
                "Error while propagating task failure"
            );
        }
    }
}
