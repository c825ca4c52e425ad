//! Runtime system
//!
//! This module contains the task executor and the concurrency primitives that
//! task code uses to coordinate lifecycles.

pub mod scheduler;
pub mod sync;
