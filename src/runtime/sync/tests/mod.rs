//! Lifecycle primitive unit tests
