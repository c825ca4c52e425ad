//! Lifecycle coordination primitives
//!
//! Standalone building blocks used alongside the executor by task code:
//! recycling pools, completion barriers and cancellation signals.

pub mod busy_counter;
pub mod cancellation;
pub mod object_pool;
pub mod single_assignment;

#[cfg(test)]
mod tests;

pub use busy_counter::{BusyGuard, BusyReferenceCounter};
pub use cancellation::{Cancellable, CancellationSignaller, Completion};
pub use object_pool::{ObjectPool, Pooled};
pub use single_assignment::{SingleAssignmentMap, SyncError};
