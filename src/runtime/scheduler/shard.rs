//! Sharded concurrent map.
//!
//! Keys are spread over independently locked shards so that operations on
//! unrelated keys contend only when they hash to the same shard. Every
//! operation touches exactly one shard lock, so there is no lock ordering to
//! respect.

use std::hash::{BuildHasher, Hash};

use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::Mutex;

/// Default shard count; always a power of two.
pub const DEFAULT_SHARDS: usize = 32;

/// A map split into independently locked shards.
pub struct ShardedMap<K, V> {
    shards: Box<[Mutex<HashMap<K, V>>]>,
    hasher: DefaultHashBuilder,
    mask: usize,
}

impl<K, V> std::fmt::Debug for ShardedMap<K, V> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ShardedMap")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl<K: Eq + Hash, V> ShardedMap<K, V> {
    /// Create a map with [`DEFAULT_SHARDS`] shards.
    #[inline]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a map with at least `shards` shards (rounded up to a power of two).
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: DefaultHashBuilder::default(),
            mask: count - 1,
        }
    }

    #[inline]
    fn shard(
        &self,
        key: &K,
    ) -> &Mutex<HashMap<K, V>> {
        let index = (self.hasher.hash_one(key) as usize) & self.mask;
        &self.shards[index]
    }

    /// Run `f` with exclusive access to the shard owning `key`.
    #[inline]
    pub fn with_shard<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut HashMap<K, V>) -> R,
    ) -> R {
        let mut shard = self.shard(key).lock();
        f(&mut shard)
    }

    /// Remove `key`, returning its value.
    #[inline]
    pub fn remove(
        &self,
        key: &K,
    ) -> Option<V> {
        self.shard(key).lock().remove(key)
    }

    /// Check whether `key` is present.
    #[inline]
    pub fn contains_key(
        &self,
        key: &K,
    ) -> bool {
        self.shard(key).lock().contains_key(key)
    }

    /// Total number of entries across all shards.
    ///
    /// Shards are visited one at a time, so the result is only a snapshot
    /// when the map is being modified concurrently.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Check whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }
}

impl<K: Eq + Hash, V: Clone> ShardedMap<K, V> {
    /// Insert `value` only if `key` is absent.
    ///
    /// Returns the existing value when the key was already present.
    pub fn insert_if_absent(
        &self,
        key: K,
        value: V,
    ) -> Option<V> {
        let mut shard = self.shard(&key).lock();
        if let Some(existing) = shard.get(&key) {
            return Some(existing.clone());
        }
        shard.insert(key, value);
        None
    }

    /// Get a copy of the value stored under `key`.
    #[inline]
    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.shard(key).lock().get(key).cloned()
    }
}

impl<K: Eq + Hash, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
