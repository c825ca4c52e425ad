//! Cooperative cancellation primitives.
//!
//! Neither type interrupts running work: task bodies poll or subscribe to
//! them and stop on their own.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::error;

use crate::util::panic_message;

/// Terminal result of a signalled operation; `Err` carries the failure cause.
pub type Completion = Result<(), Arc<anyhow::Error>>;

type CompletionListener = Box<dyn FnOnce(&Completion) + Send>;
type CancelCallback = Box<dyn Fn(&CancellationSignaller) + Send + Sync>;

/// A one-shot completion event with a cancellation request hook.
///
/// The first [`fire_complete`](Self::fire_complete) wins and runs every listener
/// registered so far; listeners added later run immediately with the stored
/// result. [`cancel`](Self::cancel) only asks the owner to stop: the owner
/// still completes the signaller itself.
pub struct CancellationSignaller {
    finished: OnceCell<Completion>,
    cancelled: AtomicBool,
    listeners: Mutex<Vec<CompletionListener>>,
    on_cancel: CancelCallback,
}

impl std::fmt::Debug for CancellationSignaller {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CancellationSignaller")
            .field("finished", &self.finished.get())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationSignaller {
    /// Create a signaller that runs `on_cancel` the first time it is cancelled.
    pub fn new<F>(on_cancel: F) -> Self
    where
        F: Fn(&CancellationSignaller) + Send + Sync + 'static,
    {
        Self {
            finished: OnceCell::new(),
            cancelled: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            on_cancel: Box::new(on_cancel),
        }
    }

    /// A signaller that has already completed successfully and been cancelled.
    pub fn completed() -> Self {
        let signaller = Self::new(|_| {});
        let _ = signaller.finished.set(Ok(()));
        signaller.cancelled.store(true, Ordering::SeqCst);
        signaller
    }

    /// Complete the signaller. Only the first call has an effect.
    ///
    /// Returns whether this call completed it.
    pub fn fire_complete(
        &self,
        result: Completion,
    ) -> bool {
        if self.finished.set(result).is_err() {
            return false;
        }

        let listeners = std::mem::take(&mut *self.listeners.lock());
        if let Some(result) = self.finished.get() {
            for listener in listeners {
                notify(listener, result);
            }
        }
        true
    }

    /// Complete successfully.
    #[inline]
    pub fn succeed(&self) -> bool {
        self.fire_complete(Ok(()))
    }

    /// Complete with a failure cause.
    #[inline]
    pub fn fail(
        &self,
        cause: anyhow::Error,
    ) -> bool {
        self.fire_complete(Err(Arc::new(cause)))
    }

    /// Run `listener` on completion, or now if already complete.
    pub fn add_listener<F>(
        &self,
        listener: F,
    ) where
        F: FnOnce(&Completion) + Send + 'static,
    {
        if let Some(result) = self.finished.get() {
            listener(result);
            return;
        }

        let listener: CompletionListener = {
            let mut listeners = self.listeners.lock();
            // Re-check under the lock: a completer takes the list after setting the cell.
            if self.finished.get().is_none() {
                listeners.push(Box::new(listener));
                return;
            }
            Box::new(listener)
        };

        if let Some(result) = self.finished.get() {
            listener(result);
        }
    }

    /// Request cancellation. Only the first call runs the callback.
    ///
    /// Returns whether this call cancelled. A panicking callback is logged;
    /// the signaller still counts as cancelled.
    pub fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.on_cancel)(self))) {
            error!(panic = %panic_message(payload.as_ref()), "cancellation callback panicked");
        }
        true
    }

    /// Check whether cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check whether the signaller has completed.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.finished.get().is_some()
    }

    /// The completion result, if completed.
    #[inline]
    pub fn result(&self) -> Option<&Completion> {
        self.finished.get()
    }
}

fn notify(
    listener: CompletionListener,
    result: &Completion,
) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(result))) {
        error!(panic = %panic_message(payload.as_ref()), "completion listener panicked");
    }
}

/// A cloneable cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
}

impl Cancellable {
    /// Create an uncancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as cancelled. Idempotent.
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
