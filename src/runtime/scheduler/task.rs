//! Task definitions for the scheduler.
//!
//! This module defines the [`Task`] contract consumed by the
//! [`ExecutorManager`](super::ExecutorManager), the [`LockToken`] resource
//! handle, and [`SimpleTask`], a closure-backed task for plain work items.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::error;

use super::errors::EngineError;
use super::worker::LockRelease;
use crate::util::panic_message;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate a process-unique task ID.
    pub fn next() -> Self {
        static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum TokenRepr {
    Unique(u64),
    Named(Arc<str>),
}

/// Opaque identifier for a resource a task must hold exclusively while it runs.
///
/// Tokens created with [`LockToken::new`] are unique; tokens created with
/// [`LockToken::named`] are equal whenever their names are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(TokenRepr);

impl LockToken {
    /// Create a fresh token that is equal only to its own clones.
    pub fn new() -> Self {
        static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);
        Self(TokenRepr::Unique(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)))
    }

    /// Create a token identified by name.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self(TokenRepr::Named(name.into()))
    }

    /// The token's name, if it was created with [`LockToken::named`].
    pub fn name(&self) -> Option<&str> {
        match &self.0 {
            TokenRepr::Named(name) => Some(name),
            TokenRepr::Unique(_) => None,
        }
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.0 {
            TokenRepr::Unique(id) => write!(f, "#{}", id),
            TokenRepr::Named(name) => f.write_str(name),
        }
    }
}

impl fmt::Debug for LockToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "LockToken({})", self)
    }
}

/// Why a task did not complete normally.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("task returned an error: {0:#}")]
    Error(anyhow::Error),

    #[error("task panicked: {0}")]
    Panic(String),

    #[error("task could not be requeued: {0}")]
    Rejected(#[source] EngineError),
}

/// A task failure, plus any secondary errors raised while recovering from it.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct TaskFailure {
    cause: FailureCause,
    suppressed: Vec<EngineError>,
}

impl TaskFailure {
    /// Wrap a failure cause.
    pub fn new(cause: FailureCause) -> Self {
        Self {
            cause,
            suppressed: Vec::new(),
        }
    }

    /// Build a failure from a panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(FailureCause::Panic(panic_message(payload.as_ref())))
    }

    /// The primary cause.
    #[inline]
    pub fn cause(&self) -> &FailureCause {
        &self.cause
    }

    /// Consume the failure and return its primary cause.
    #[inline]
    pub fn into_cause(self) -> FailureCause {
        self.cause
    }

    /// Errors raised while cleaning up after the primary cause.
    #[inline]
    pub fn suppressed(&self) -> &[EngineError] {
        &self.suppressed
    }

    /// Attach a secondary error.
    #[inline]
    pub fn add_suppressed(
        &mut self,
        error: EngineError,
    ) {
        self.suppressed.push(error);
    }

    /// Check whether the task panicked.
    #[inline]
    pub fn is_panic(&self) -> bool {
        matches!(self.cause, FailureCause::Panic(_))
    }
}

/// A schedulable unit of work.
///
/// A task is submitted once and executed at most once. While it runs, the
/// executor guarantees that no other task holding any of its
/// [`lock_tokens`](Task::lock_tokens) runs concurrently.
pub trait Task: Send + Sync + 'static {
    /// Execute the task.
    ///
    /// The body may call [`LockRelease::release`] as soon as it no longer needs
    /// its locks. Whatever the body does, the worker releases the locks after
    /// `run` returns or panics if they are still held.
    fn run(
        &self,
        release: &LockRelease<'_>,
    ) -> anyhow::Result<()>;

    /// Receive the failure of [`run`](Task::run).
    fn propagate_failure(
        &self,
        failure: TaskFailure,
    ) {
        error!(error = %failure, suppressed = failure.suppressed().len(), "task failed");
    }

    /// Resources this task needs exclusively.
    ///
    /// Must return the same tokens, in the same order, on every call.
    fn lock_tokens(&self) -> &[LockToken] {
        &[]
    }

    /// Current priority; 0 is the highest.
    ///
    /// After changing it while the task is queued, call
    /// [`ExecutorManager::notify_priority_change`](super::ExecutorManager::notify_priority_change).
    fn priority(&self) -> usize;
}

/// Shared handle to a task, compared and hashed by allocation identity.
#[derive(Clone)]
pub struct TaskRef(Arc<dyn Task>);

impl TaskRef {
    /// Wrap a task.
    #[inline]
    pub fn new<T: Task>(task: Arc<T>) -> Self {
        Self(task)
    }

    #[inline]
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Check whether this handle refers to the given task allocation.
    #[inline]
    pub fn is<T: Task>(
        &self,
        task: &Arc<T>,
    ) -> bool {
        self.addr() == Arc::as_ptr(task) as *const () as usize
    }
}

impl<T: Task> From<Arc<T>> for TaskRef {
    fn from(task: Arc<T>) -> Self {
        Self::new(task)
    }
}

impl From<Arc<dyn Task>> for TaskRef {
    fn from(task: Arc<dyn Task>) -> Self {
        Self(task)
    }
}

impl std::ops::Deref for TaskRef {
    type Target = dyn Task;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for TaskRef {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for TaskRef {}

impl Hash for TaskRef {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("priority", &self.0.priority())
            .field("locks", &self.0.lock_tokens())
            .finish()
    }
}

type Body = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type FailureHook = Box<dyn Fn(TaskFailure) + Send + Sync>;

/// A closure-backed task.
///
/// The closure runs at most once; the task releases its locks as soon as the
/// closure returns successfully. Without a failure hook, failures are logged.
pub struct SimpleTask {
    id: TaskId,
    name: String,
    body: Mutex<Option<Body>>,
    priority: AtomicUsize,
    lock_tokens: Vec<LockToken>,
    on_failure: Option<FailureHook>,
}

impl fmt::Debug for SimpleTask {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SimpleTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority())
            .field("lock_tokens", &self.lock_tokens)
            .field("executed", &self.is_executed())
            .finish()
    }
}

impl SimpleTask {
    /// Create a lock-free task running `f` at `priority`.
    pub fn new<F>(
        f: F,
        priority: usize,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        TaskBuilder::new().priority(priority).build(f)
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change the priority.
    ///
    /// If the task is queued, follow up with
    /// [`ExecutorManager::notify_priority_change`](super::ExecutorManager::notify_priority_change).
    #[inline]
    pub fn set_priority(
        &self,
        priority: usize,
    ) {
        self.priority.store(priority, Ordering::SeqCst);
    }

    /// Check whether the closure has been taken for execution.
    #[inline]
    pub fn is_executed(&self) -> bool {
        self.body.lock().is_none()
    }
}

impl Task for SimpleTask {
    fn run(
        &self,
        release: &LockRelease<'_>,
    ) -> anyhow::Result<()> {
        let body = self.body.lock().take();
        if let Some(body) = body {
            // On error the worker releases and keeps any release error as suppressed.
            body()?;
        }
        release.release().map_err(Into::into)
    }

    fn propagate_failure(
        &self,
        failure: TaskFailure,
    ) {
        match &self.on_failure {
            Some(hook) => hook(failure),
            None => {
                error!(task = %self.id, name = %self.name, error = %failure, "task failed")
            }
        }
    }

    fn lock_tokens(&self) -> &[LockToken] {
        &self.lock_tokens
    }

    fn priority(&self) -> usize {
        self.priority.load(Ordering::SeqCst)
    }
}

/// Builder for [`SimpleTask`].
#[derive(Default)]
pub struct TaskBuilder {
    name: Option<String>,
    priority: usize,
    lock_tokens: Vec<LockToken>,
    on_failure: Option<FailureHook>,
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the task priority.
    #[inline]
    pub fn priority(
        mut self,
        priority: usize,
    ) -> Self {
        self.priority = priority;
        self
    }

    /// Require a lock token.
    #[inline]
    pub fn lock(
        mut self,
        token: LockToken,
    ) -> Self {
        self.lock_tokens.push(token);
        self
    }

    /// Require several lock tokens, in order.
    #[inline]
    pub fn locks(
        mut self,
        tokens: impl IntoIterator<Item = LockToken>,
    ) -> Self {
        self.lock_tokens.extend(tokens);
        self
    }

    /// Handle failures instead of logging them.
    #[inline]
    pub fn on_failure<H>(
        mut self,
        hook: H,
    ) -> Self
    where
        H: Fn(TaskFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Build a task from an infallible closure.
    pub fn build<F>(
        self,
        f: F,
    ) -> SimpleTask
    where
        F: FnOnce() + Send + 'static,
    {
        self.build_fallible(move || {
            f();
            Ok(())
        })
    }

    /// Build a task from a closure that may fail.
    pub fn build_fallible<F>(
        self,
        f: F,
    ) -> SimpleTask
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let id = TaskId::next();
        let name = self.name.unwrap_or_else(|| id.to_string());

        SimpleTask {
            id,
            name,
            body: Mutex::new(Some(Box::new(f))),
            priority: AtomicUsize::new(self.priority),
            lock_tokens: self.lock_tokens,
            on_failure: self.on_failure,
        }
    }
}

impl fmt::Debug for TaskBuilder {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("lock_tokens", &self.lock_tokens)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
