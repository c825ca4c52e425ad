//! Write-once concurrent map.

use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::runtime::scheduler::shard::ShardedMap;

/// Single-assignment violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Key '{0}' is already initialized")]
    AlreadyAssigned(String),

    #[error("Key '{0}' is not initialized")]
    Unassigned(String),
}

/// A concurrent map whose keys can each be assigned at most once.
pub struct SingleAssignmentMap<K, V> {
    entries: ShardedMap<K, V>,
}

impl<K, V> fmt::Debug for SingleAssignmentMap<K, V> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SingleAssignmentMap").finish_non_exhaustive()
    }
}

impl<K, V> SingleAssignmentMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Clone,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: ShardedMap::new(),
        }
    }

    /// Assign `value` to `key`, failing if it already has one.
    pub fn set(
        &self,
        key: K,
        value: V,
    ) -> Result<(), SyncError> {
        let name = format!("{:?}", key);
        match self.entries.insert_if_absent(key, value) {
            None => Ok(()),
            Some(_) => Err(SyncError::AlreadyAssigned(name)),
        }
    }

    /// Get the value assigned to `key`.
    pub fn get(
        &self,
        key: &K,
    ) -> Result<V, SyncError> {
        self.entries
            .get(key)
            .ok_or_else(|| SyncError::Unassigned(format!("{:?}", key)))
    }

    /// Check whether `key` has been assigned.
    #[inline]
    pub fn is_assigned(
        &self,
        key: &K,
    ) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of assigned keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no key has been assigned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for SingleAssignmentMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
