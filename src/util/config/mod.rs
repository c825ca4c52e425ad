//! Executor configuration
//!
//! Configuration is resolved with merge semantics:
//!
//! ```text
//! Priority (high → low):
//! 1. Explicit `with_*` calls
//! 2. Environment variables (LOCKWEAVE_*)
//! 3. Serialized configuration (any serde format)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use lockweave::util::config::ExecutorConfig;
//!
//! let config = ExecutorConfig::default()
//!     .with_worker_threads(2)
//!     .with_priority_levels(8);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::thread;
use thiserror::Error;

/// Environment variable overriding [`ExecutorConfig::worker_threads`].
pub const ENV_WORKERS: &str = "LOCKWEAVE_WORKERS";
/// Environment variable overriding [`ExecutorConfig::priority_levels`].
pub const ENV_PRIORITY_LEVELS: &str = "LOCKWEAVE_PRIORITY_LEVELS";
/// Environment variable overriding [`ExecutorConfig::thread_name`].
pub const ENV_THREAD_NAME: &str = "LOCKWEAVE_THREAD_NAME";
/// Environment variable overriding [`ExecutorConfig::stack_size`].
pub const ENV_STACK_SIZE: &str = "LOCKWEAVE_STACK_SIZE";

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Number of priority levels (0 = highest).
    #[serde(default = "default_priority_levels")]
    pub priority_levels: usize,
    /// Worker thread name prefix; workers are named `{prefix}-{index}`.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Worker stack size in bytes (None = platform default).
    #[serde(default)]
    pub stack_size: Option<usize>,
}

fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_priority_levels() -> usize {
    64
}

fn default_thread_name() -> String {
    "lockweave-worker".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            priority_levels: default_priority_levels(),
            thread_name: default_thread_name(),
            stack_size: None,
        }
    }
}

impl ExecutorConfig {
    /// Set the worker thread count.
    #[inline]
    pub fn with_worker_threads(
        mut self,
        worker_threads: usize,
    ) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Set the number of priority levels.
    #[inline]
    pub fn with_priority_levels(
        mut self,
        priority_levels: usize,
    ) -> Self {
        self.priority_levels = priority_levels;
        self
    }

    /// Set the worker thread name prefix.
    #[inline]
    pub fn with_thread_name(
        mut self,
        thread_name: impl Into<String>,
    ) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Set the worker stack size.
    #[inline]
    pub fn with_stack_size(
        mut self,
        stack_size: usize,
    ) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Defaults overridden by `LOCKWEAVE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Override fields from a variable lookup.
    pub fn merge_env<F>(
        mut self,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.worker_threads = parse_usize(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_PRIORITY_LEVELS) {
            self.priority_levels = parse_usize(ENV_PRIORITY_LEVELS, &value)?;
        }
        if let Some(value) = lookup(ENV_THREAD_NAME) {
            self.thread_name = value;
        }
        if let Some(value) = lookup(ENV_STACK_SIZE) {
            self.stack_size = Some(parse_usize(ENV_STACK_SIZE, &value)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that the configuration can start an executor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.priority_levels == 0 {
            return Err(ConfigError::Invalid {
                field: "priority_levels",
                reason: "must be positive",
            });
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_name",
                reason: "must not be empty",
            });
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "stack_size",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

fn parse_usize(
    key: &'static str,
    value: &str,
) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|source| ConfigError::Env {
            key,
            value: value.to_string(),
            source,
        })
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("Cannot parse {key}={value:?}: {source}")]
    Env {
        key: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
}
