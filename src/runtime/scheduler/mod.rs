//! Priority-driven executor with lock-token admission
//!
//! This module provides the [`ExecutorManager`], which runs [`Task`]s on a
//! fixed pool of worker threads. Ready tasks wait in a
//! [`DynamicPriorityQueue`]; before a dequeued task may run, the lock
//! coordinator claims all of its [`LockToken`]s at once. A task that loses the
//! race becomes a waiter on the current holder and is requeued when the holder
//! releases, so no two tasks sharing a token ever run concurrently.
//!
//! Claiming is lock-free across unrelated token sets: each token is an entry in
//! a sharded map, and a failed claim rolls back and retries instead of taking a
//! global lock.

pub mod errors;
pub mod queue;
pub mod task;
pub mod worker;

pub(crate) mod locks;
pub(crate) mod shard;

#[cfg(test)]
mod tests;

pub use errors::{EngineError, EngineResult, QueueError};
pub use queue::DynamicPriorityQueue;
pub use task::{FailureCause, LockToken, SimpleTask, Task, TaskBuilder, TaskFailure, TaskId, TaskRef};
pub use worker::{LockRelease, WorkerState};

use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::util::config::ExecutorConfig;
use crate::util::panic_message;
use locks::{distinct_tokens, Claim, LockTable, WaiterList};
use worker::{StateCell, WorkerThread};

/// Executor statistics.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Total tasks accepted by `schedule`.
    pub tasks_scheduled: AtomicUsize,
    /// Total tasks that ran to completion.
    pub tasks_executed: AtomicUsize,
    /// Total tasks whose body failed or panicked.
    pub tasks_failed: AtomicUsize,
    /// Claim attempts that found a token already held.
    pub lock_contentions: AtomicUsize,
    /// Waiters put back into the queue after a release.
    pub waiters_requeued: AtomicUsize,
    /// Times a worker parked on the monitor.
    pub parks: AtomicUsize,
}

impl ExecutorStats {
    /// Record a scheduled task.
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a completed task.
    #[inline]
    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed task.
    #[inline]
    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a lost claim.
    #[inline]
    pub fn record_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a requeued waiter.
    #[inline]
    pub fn record_requeue(&self) {
        self.waiters_requeued.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a worker park.
    #[inline]
    pub fn record_park(&self) {
        self.parks.fetch_add(1, Ordering::SeqCst);
    }

    /// Tasks that finished, successfully or not.
    pub fn tasks_finished(&self) -> usize {
        self.tasks_executed.load(Ordering::SeqCst) + self.tasks_failed.load(Ordering::SeqCst)
    }
}

/// State shared between the manager, its workers and executor handles.
#[derive(Debug)]
pub(crate) struct Shared {
    queue: DynamicPriorityQueue<TaskRef>,
    locks: LockTable,
    /// Workers park here; every wakeup takes this lock before notifying.
    monitor: Mutex<()>,
    wake: Condvar,
    shutdown: AtomicBool,
    stats: ExecutorStats,
}

impl Shared {
    fn new(priority_levels: usize) -> EngineResult<Self> {
        Ok(Self {
            queue: DynamicPriorityQueue::new(priority_levels)?,
            locks: LockTable::new(),
            monitor: Mutex::new(()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            stats: ExecutorStats::default(),
        })
    }

    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn has_pending_tasks(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Try to claim every lock token of `task`.
    ///
    /// On failure the task is registered as a waiter on the current holder and
    /// must not be requeued by the caller.
    pub(crate) fn try_lock(
        &self,
        task: &TaskRef,
    ) -> bool {
        let tokens = distinct_tokens(task.lock_tokens());
        if tokens.is_empty() {
            return true;
        }

        let list = WaiterList::new();
        loop {
            match self.locks.claim(&tokens, &list) {
                Claim::Acquired => {
                    trace!(locks = tokens.len(), "claimed all locks");
                    return true;
                }
                Claim::Held(holder) => {
                    self.stats.record_contention();
                    if !holder.add_if_not_freed(task.clone()) {
                        trace!("holder released during claim, retrying");
                        continue;
                    }

                    // Tasks may have queued on our list while it was installed.
                    self.call_listeners(&list);
                    return false;
                }
            }
        }
    }

    /// Release every lock token of `task` and requeue its waiters.
    ///
    /// On error, every waiter list already taken out of the table is still
    /// freed, so no waiter is left without a way back into the queue.
    pub(crate) fn release_locks(
        &self,
        task: &TaskRef,
    ) -> EngineResult<()> {
        let tokens = distinct_tokens(task.lock_tokens());
        let mut removed: SmallVec<[Arc<WaiterList>; 1]> = SmallVec::new();
        let mut outcome = Ok(());

        for token in &tokens {
            let Some(list) = self.locks.remove(token) else {
                outcome = Err(EngineError::LockNotHeld(token.clone()));
                break;
            };

            if removed.iter().any(|seen| Arc::ptr_eq(seen, &list)) {
                continue;
            }
            let mismatched = !removed.is_empty();
            removed.push(list);
            if mismatched {
                outcome = Err(EngineError::InconsistentWaiters);
                break;
            }
        }

        for list in &removed {
            self.call_listeners(list);
        }
        if let Err(error) = &outcome {
            warn!(error = %error, freed = removed.len(), "lock release failed");
        }
        outcome
    }

    /// Free a waiter list, requeue its waiters and wake the workers.
    fn call_listeners(
        &self,
        list: &WaiterList,
    ) {
        let waiters = list.mark_freed();
        for task in waiters {
            self.requeue(task);
        }
        self.wakeup();
    }

    fn requeue(
        &self,
        task: TaskRef,
    ) {
        match self.queue.enqueue(task.clone(), task.priority()) {
            Ok(()) => self.stats.record_requeue(),
            Err(rejected) => {
                error!(error = %rejected, "failed to requeue waiting task");
                let failure = TaskFailure::new(FailureCause::Rejected(rejected.into()));
                let propagated =
                    panic::catch_unwind(AssertUnwindSafe(|| task.propagate_failure(failure)));
                if let Err(payload) = propagated {
                    error!(
                        panic = %panic_message(payload.as_ref()),
                        "Error while propagating task failure"
                    );
                }
            }
        }
    }

    pub(crate) fn schedule(
        &self,
        task: TaskRef,
    ) -> EngineResult<()> {
        if self.is_shutdown() {
            return Err(EngineError::ShutDown);
        }
        let priority = task.priority();
        self.queue.enqueue(task, priority)?;
        self.stats.record_scheduled();
        self.wakeup();
        Ok(())
    }

    /// Dequeue until a task claims all of its locks.
    pub(crate) fn poll_executable_task(&self) -> Option<TaskRef> {
        while let Some(task) = self.queue.dequeue() {
            if self.try_lock(&task) {
                return Some(task);
            }
        }
        None
    }

    fn wakeup(&self) {
        let _monitor = self.monitor.lock();
        self.wake.notify_all();
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wakeup();
    }
}

type ThreadInitializer = Arc<dyn Fn(usize) + Send + Sync>;

struct WorkerHandle {
    state: Arc<StateCell>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Executes tasks by priority on a fixed pool of worker threads, never running
/// two tasks that share a lock token at the same time.
pub struct ExecutorManager {
    config: ExecutorConfig,
    shared: Arc<Shared>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl std::fmt::Debug for ExecutorManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ExecutorManager")
            .field("config", &self.config)
            .field("pending", &self.shared.queue.len())
            .field("shutdown", &self.shared.is_shutdown())
            .finish()
    }
}

impl ExecutorManager {
    /// Create an executor from a configuration.
    pub fn new(config: ExecutorConfig) -> EngineResult<Self> {
        Self::build(config, None)
    }

    /// Create an executor with `worker_threads` workers and default settings.
    pub fn with_workers(worker_threads: usize) -> EngineResult<Self> {
        Self::new(ExecutorConfig::default().with_worker_threads(worker_threads))
    }

    /// Create an executor whose workers run `initializer(index)` on startup.
    pub fn with_initializer<F>(
        config: ExecutorConfig,
        initializer: F,
    ) -> EngineResult<Self>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        Self::build(config, Some(Arc::new(initializer)))
    }

    fn build(
        config: ExecutorConfig,
        initializer: Option<ThreadInitializer>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(config.priority_levels)?);
        let manager = Self {
            config,
            shared,
            workers: Mutex::new(Vec::new()),
        };
        manager.spawn_workers(initializer)?;

        debug!(
            workers = manager.config.worker_threads,
            levels = manager.config.priority_levels,
            "executor started"
        );
        Ok(manager)
    }

    /// Spawn worker threads.
    fn spawn_workers(
        &self,
        initializer: Option<ThreadInitializer>,
    ) -> EngineResult<()> {
        let mut workers = self.workers.lock();
        workers.reserve(self.config.worker_threads);

        for index in 0..self.config.worker_threads {
            let state = Arc::new(StateCell::new());
            let worker = WorkerThread::new(index, self.shared.clone(), state.clone());
            let initializer = initializer.clone();

            let mut builder =
                thread::Builder::new().name(format!("{}-{}", self.config.thread_name, index));
            if let Some(stack_size) = self.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || {
                if let Some(initializer) = initializer {
                    let initialized = panic::catch_unwind(AssertUnwindSafe(|| initializer(index)));
                    if let Err(payload) = initialized {
                        error!(
                            worker = index,
                            panic = %panic_message(payload.as_ref()),
                            "worker initializer panicked"
                        );
                    }
                }
                worker.run();
            });

            match spawned {
                Ok(thread) => workers.push(WorkerHandle {
                    state,
                    thread: Some(thread),
                }),
                Err(source) => {
                    drop(workers);
                    self.shutdown();
                    self.join();
                    return Err(EngineError::Spawn(source));
                }
            }
        }
        Ok(())
    }

    /// Submit a task.
    ///
    /// Fails if the task is already queued, its priority is out of range, or
    /// the executor has been shut down.
    pub fn schedule(
        &self,
        task: impl Into<TaskRef>,
    ) -> EngineResult<()> {
        self.shared.schedule(task.into())
    }

    /// Submit a closure as a lock-free [`SimpleTask`].
    pub fn schedule_fn<F>(
        &self,
        f: F,
        priority: usize,
    ) -> EngineResult<Arc<SimpleTask>>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Arc::new(SimpleTask::new(f, priority));
        self.schedule(task.clone())?;
        Ok(task)
    }

    /// A handle that submits closures at a fixed priority.
    pub fn executor(
        &self,
        priority: usize,
    ) -> PriorityExecutor {
        PriorityExecutor {
            shared: self.shared.clone(),
            priority,
        }
    }

    /// Move a queued task to the level matching its current priority.
    ///
    /// Returns `Ok(false)` if the task is not queued or did not move. Must not
    /// race with another priority change of the same task.
    pub fn notify_priority_change(
        &self,
        task: impl Into<TaskRef>,
    ) -> EngineResult<bool> {
        let task = task.into();
        let priority = task.priority();
        Ok(self.shared.queue.change_priority(&task, priority)?)
    }

    /// Check if any task is queued.
    #[inline]
    pub fn has_pending_tasks(&self) -> bool {
        self.shared.has_pending_tasks()
    }

    /// Number of queued tasks (waiters excluded).
    #[inline]
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Check whether a lock token is currently held.
    #[inline]
    pub fn is_locked(
        &self,
        token: &LockToken,
    ) -> bool {
        self.shared.locks.is_held(token)
    }

    /// Number of lock tokens currently held.
    #[inline]
    pub fn held_locks(&self) -> usize {
        self.shared.locks.held()
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &ExecutorStats {
        &self.shared.stats
    }

    /// Snapshot of each worker's state.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers
            .lock()
            .iter()
            .map(|worker| worker.state.get())
            .collect()
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.config.worker_threads
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Check if the executor is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.shared.is_shutdown()
    }

    /// Ask every worker to stop after its current task.
    ///
    /// Queued tasks are abandoned. Does not wait; see [`join`](Self::join).
    pub fn shutdown(&self) {
        if !self.shared.is_shutdown() {
            debug!(pending = self.shared.queue.len(), "executor shutting down");
        }
        self.shared.signal_shutdown();
    }

    /// Wait for workers to exit.
    ///
    /// Called from inside a task, the calling worker is skipped.
    pub fn join(&self) {
        let current = thread::current().id();
        let handles: Vec<_> = self
            .workers
            .lock()
            .iter_mut()
            .filter_map(|worker| worker.thread.take())
            .collect();

        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for ExecutorManager {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

/// Submits closures to an executor at a fixed priority.
#[derive(Clone)]
pub struct PriorityExecutor {
    shared: Arc<Shared>,
    priority: usize,
}

impl PriorityExecutor {
    /// Submit a closure.
    pub fn execute<F>(
        &self,
        f: F,
    ) -> EngineResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Arc::new(SimpleTask::new(f, self.priority));
        self.shared.schedule(TaskRef::new(task))
    }

    /// The priority closures are submitted at.
    #[inline]
    pub fn priority(&self) -> usize {
        self.priority
    }
}

impl std::fmt::Debug for PriorityExecutor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PriorityExecutor")
            .field("priority", &self.priority)
            .finish()
    }
}
