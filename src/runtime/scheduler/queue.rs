//! Dynamic priority queue for the scheduler
//!
//! Multi-producer, multi-consumer queue with a fixed number of priority levels
//! (0 = highest). Each level is an independent FIFO, so producers and consumers
//! only contend on the level they touch. Membership is tracked in a sharded
//! map, which makes `contains`, `remove` and `change_priority` independent of
//! queue length for the lookup part.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use tracing::trace;

use super::errors::QueueError;
use super::shard::ShardedMap;

/// One FIFO level plus its lock-free occupancy hint.
#[derive(Debug)]
struct Level<E> {
    queue: Mutex<VecDeque<E>>,
    /// Updated while holding `queue`, read without it.
    approx_len: CachePadded<AtomicUsize>,
}

impl<E> Level<E> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            approx_len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    fn push(
        &self,
        element: E,
    ) {
        let mut queue = self.queue.lock();
        queue.push_back(element);
        self.approx_len.store(queue.len(), Ordering::Release);
    }

    #[inline]
    fn pop(&self) -> Option<E> {
        let mut queue = self.queue.lock();
        let element = queue.pop_front();
        self.approx_len.store(queue.len(), Ordering::Release);
        element
    }

    fn remove(
        &self,
        element: &E,
    ) -> bool
    where
        E: PartialEq,
    {
        let mut queue = self.queue.lock();
        match queue.iter().position(|queued| queued == element) {
            Some(index) => {
                queue.remove(index);
                self.approx_len.store(queue.len(), Ordering::Release);
                true
            }
            None => false,
        }
    }

    #[inline]
    fn approx_len(&self) -> usize {
        self.approx_len.load(Ordering::Acquire)
    }
}

/// A concurrent priority queue supporting dynamic re-prioritization.
///
/// Elements are compared by `Eq`/`Hash`; an element may be queued at most once
/// at a time.
///
/// # Concurrency
///
/// Enqueue and dequeue are safe from any number of threads.
/// [`change_priority`](Self::change_priority) is best-effort: it must not race
/// with a dequeue or another priority change of the *same* element, otherwise
/// the membership map and the level FIFOs can disagree about where it lives.
pub struct DynamicPriorityQueue<E> {
    levels: Box<[Level<E>]>,
    membership: ShardedMap<E, usize>,
}

impl<E> std::fmt::Debug for DynamicPriorityQueue<E> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let lens: Vec<usize> = self.levels.iter().map(Level::approx_len).collect();
        f.debug_struct("DynamicPriorityQueue")
            .field("levels", &lens)
            .finish()
    }
}

impl<E: Eq + Hash + Clone> DynamicPriorityQueue<E> {
    /// Create a queue with `levels` priority levels.
    pub fn new(levels: usize) -> Result<Self, QueueError> {
        if levels == 0 {
            return Err(QueueError::InvalidLevels);
        }

        let levels = (0..levels)
            .map(|_| Level::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            levels,
            membership: ShardedMap::new(),
        })
    }

    /// Number of priority levels.
    #[inline]
    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    fn validate_priority(
        &self,
        priority: usize,
    ) -> Result<(), QueueError> {
        if priority >= self.levels.len() {
            return Err(QueueError::PriorityOutOfRange {
                priority,
                levels: self.levels.len(),
            });
        }
        Ok(())
    }

    /// Enqueue an element at the tail of the given priority level.
    pub fn enqueue(
        &self,
        element: E,
        priority: usize,
    ) -> Result<(), QueueError> {
        self.validate_priority(priority)?;

        if self
            .membership
            .insert_if_absent(element.clone(), priority)
            .is_some()
        {
            return Err(QueueError::DuplicateElement);
        }

        self.levels[priority].push(element);
        trace!(priority, "enqueued element");
        Ok(())
    }

    /// Dequeue the head of the highest-priority non-empty level.
    pub fn dequeue(&self) -> Option<E> {
        for (priority, level) in self.levels.iter().enumerate() {
            if level.approx_len() == 0 {
                continue;
            }

            if let Some(element) = level.pop() {
                self.membership.remove(&element);
                trace!(priority, "dequeued element");
                return Some(element);
            }
        }
        None
    }

    /// Move an element to a new priority level.
    ///
    /// Returns `Ok(false)` when the element is not queued, is already at
    /// `new_priority`, or was dequeued concurrently.
    pub fn change_priority(
        &self,
        element: &E,
        new_priority: usize,
    ) -> Result<bool, QueueError> {
        self.validate_priority(new_priority)?;

        let current = match self.membership.get(element) {
            Some(current) if current != new_priority => current,
            _ => return Ok(false),
        };

        if !self.levels[current].remove(element) {
            return Ok(false);
        }

        self.membership
            .with_shard(element, |shard| shard.insert(element.clone(), new_priority));
        self.levels[new_priority].push(element.clone());

        trace!(from = current, to = new_priority, "changed element priority");
        Ok(true)
    }

    /// Check whether the element is queued.
    #[inline]
    pub fn contains(
        &self,
        element: &E,
    ) -> bool {
        self.membership.contains_key(element)
    }

    /// Remove an element from the queue, returning whether it was present.
    pub fn remove(
        &self,
        element: &E,
    ) -> bool {
        match self.membership.remove(element) {
            Some(priority) => self.levels[priority].remove(element),
            None => false,
        }
    }

    /// Number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.membership.len()
    }

    /// Check if no element is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    /// Approximate number of elements at one level.
    #[inline]
    pub fn level_len(
        &self,
        priority: usize,
    ) -> usize {
        self.levels.get(priority).map_or(0, Level::approx_len)
    }
}
