//! Lock-token table.
//!
//! Maps every currently held [`LockToken`] to the waiter list of the task that
//! holds it. All tokens claimed by one task share a single [`WaiterList`], so
//! releasing the task frees the whole group at once.

use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::shard::ShardedMap;
use super::task::{LockToken, TaskRef};

/// Distinct lock tokens of one task, in declaration order.
pub(crate) type TokenSet = SmallVec<[LockToken; 4]>;

/// Collect a task's tokens, dropping repeats.
pub(crate) fn distinct_tokens(tokens: &[LockToken]) -> TokenSet {
    let mut distinct = TokenSet::with_capacity(tokens.len());
    for token in tokens {
        if !distinct.contains(token) {
            distinct.push(token.clone());
        }
    }
    distinct
}

#[derive(Debug, Default)]
struct WaiterState {
    freed: bool,
    waiters: Vec<TaskRef>,
}

/// Tasks blocked on a held token group.
#[derive(Debug, Default)]
pub(crate) struct WaiterList {
    state: Mutex<WaiterState>,
}

impl WaiterList {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter unless the holder has already released.
    pub(crate) fn add_if_not_freed(
        &self,
        task: TaskRef,
    ) -> bool {
        let mut state = self.state.lock();
        if state.freed {
            return false;
        }
        state.waiters.push(task);
        true
    }

    /// Mark the list freed and take every registered waiter.
    ///
    /// Later registrations fail, so each waiter is handed out exactly once.
    pub(crate) fn mark_freed(&self) -> Vec<TaskRef> {
        let mut state = self.state.lock();
        state.freed = true;
        std::mem::take(&mut state.waiters)
    }
}

/// Outcome of a single claim attempt.
pub(crate) enum Claim {
    /// Every token now maps to the attempt's list.
    Acquired,
    /// A token is held; the attempt has been rolled back.
    Held(Arc<WaiterList>),
}

/// Token to waiter-list table.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    holders: ShardedMap<LockToken, Arc<WaiterList>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Try to install `list` for every token, all or nothing.
    ///
    /// On the first held token, entries installed by this attempt are removed
    /// again (only where they still point at `list`) and the holder's list is
    /// returned.
    pub(crate) fn claim(
        &self,
        tokens: &[LockToken],
        list: &Arc<WaiterList>,
    ) -> Claim {
        for (index, token) in tokens.iter().enumerate() {
            if let Some(existing) = self.holders.insert_if_absent(token.clone(), list.clone()) {
                for claimed in &tokens[..index] {
                    self.remove_if_owned(claimed, list);
                }
                return Claim::Held(existing);
            }
        }
        Claim::Acquired
    }

    fn remove_if_owned(
        &self,
        token: &LockToken,
        list: &Arc<WaiterList>,
    ) {
        self.holders.with_shard(token, |shard| {
            if shard
                .get(token)
                .is_some_and(|current| Arc::ptr_eq(current, list))
            {
                shard.remove(token);
            }
        });
    }

    /// Remove a token's entry, returning its waiter list.
    pub(crate) fn remove(
        &self,
        token: &LockToken,
    ) -> Option<Arc<WaiterList>> {
        self.holders.remove(token)
    }

    /// Check whether a token is currently held.
    pub(crate) fn is_held(
        &self,
        token: &LockToken,
    ) -> bool {
        self.holders.contains_key(token)
    }

    /// Number of tokens currently held.
    pub(crate) fn held(&self) -> usize {
        self.holders.len()
    }
}
