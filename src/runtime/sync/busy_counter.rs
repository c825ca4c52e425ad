//! Reference counter with zero-crossing listeners.
//!
//! Used as a completion barrier: every outstanding operation holds a
//! reference, and listeners fire when the last one is dropped.

use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::error;

use crate::util::panic_message;

type Listener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CounterState {
    count: usize,
    listeners: Vec<Listener>,
    once: Option<Listener>,
}

/// A reference count that notifies listeners when it drops to zero.
///
/// Listeners are collected under the lock and run outside it, on the thread
/// performing the final decrement. A panicking listener is logged and does not
/// prevent the others from running.
#[derive(Default)]
pub struct BusyReferenceCounter {
    state: Mutex<CounterState>,
}

impl std::fmt::Debug for BusyReferenceCounter {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BusyReferenceCounter")
            .field("count", &state.count)
            .field("listeners", &state.listeners.len())
            .field("once", &state.once.is_some())
            .finish()
    }
}

impl BusyReferenceCounter {
    /// Create an idle counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether any reference is outstanding.
    pub fn is_busy(&self) -> bool {
        self.state.lock().count != 0
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.state.lock().count
    }

    /// Run `listener` at the next zero-crossing, or now if already idle.
    ///
    /// Listeners accumulate; each runs once.
    pub fn add_listener<F>(
        &self,
        listener: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if state.count != 0 {
                state.listeners.push(Box::new(listener));
                return;
            }
        }
        listener();
    }

    /// Like [`add_listener`](Self::add_listener), but replaces any pending
    /// one-shot listener instead of accumulating.
    pub fn add_listener_once<F>(
        &self,
        listener: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if state.count != 0 {
                state.once = Some(Box::new(listener));
                return;
            }
        }
        listener();
    }

    /// Add a reference.
    pub fn increment_ref_count(&self) {
        self.state.lock().count += 1;
    }

    /// Drop a reference, running the listeners if it was the last one.
    ///
    /// # Panics
    ///
    /// Panics on underflow.
    pub fn decrement_ref_count(&self) {
        let (listeners, once) = {
            let mut state = self.state.lock();
            assert!(state.count > 0, "Reference count underflow");
            state.count -= 1;
            if state.count != 0 {
                return;
            }
            (std::mem::take(&mut state.listeners), state.once.take())
        };

        for listener in listeners.into_iter().chain(once) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(listener)) {
                error!(panic = %panic_message(payload.as_ref()), "busy counter listener panicked");
            }
        }
    }

    /// Add a reference that is dropped with the returned guard.
    pub fn busy_guard(&self) -> BusyGuard<'_> {
        self.increment_ref_count();
        BusyGuard { counter: self }
    }
}

/// Holds one reference on a [`BusyReferenceCounter`].
#[derive(Debug)]
pub struct BusyGuard<'a> {
    counter: &'a BusyReferenceCounter,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.counter.decrement_ref_count();
    }
}
