//! Fixed-capacity object pool.
//!
//! Recycles up to `capacity` instances. When the pool is empty, `alloc`
//! constructs a fresh overflow instance instead of failing; released instances
//! beyond capacity are dropped. Initializer and cleanup hooks run outside the
//! pool lock.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

type Constructor<T> = Box<dyn Fn() -> T + Send + Sync>;
type Hook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// A thread-safe recycling pool.
pub struct ObjectPool<T> {
    constructor: Constructor<T>,
    initializer: Hook<T>,
    cleanup: Hook<T>,
    capacity: usize,
    slots: Mutex<Vec<T>>,
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl<T> ObjectPool<T> {
    /// Create a pool pre-filled with `capacity` instances.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new<C, I, R>(
        capacity: usize,
        constructor: C,
        initializer: I,
        cleanup: R,
    ) -> Self
    where
        C: Fn() -> T + Send + Sync + 'static,
        I: Fn(&mut T) + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        assert!(capacity > 0, "ObjectPool capacity must be positive");

        let slots = (0..capacity).map(|_| constructor()).collect();

        Self {
            constructor: Box::new(constructor),
            initializer: Box::new(initializer),
            cleanup: Box::new(cleanup),
            capacity,
            slots: Mutex::new(slots),
        }
    }

    /// Take an initialized instance, constructing one if the pool is empty.
    pub fn alloc(&self) -> T {
        let pooled = self.slots.lock().pop();
        let mut obj = pooled.unwrap_or_else(|| (self.constructor)());
        (self.initializer)(&mut obj);
        obj
    }

    /// Clean an instance and return it to the pool, dropping it when full.
    pub fn release(
        &self,
        mut obj: T,
    ) {
        (self.cleanup)(&mut obj);

        let mut slots = self.slots.lock();
        if slots.len() < self.capacity {
            slots.push(obj);
        }
    }

    /// Take an instance that returns itself to the pool when dropped.
    pub fn alloc_guard(&self) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            obj: Some(self.alloc()),
        }
    }

    /// Number of instances ready for reuse.
    #[inline]
    pub fn available(&self) -> usize {
        self.slots.lock().len()
    }

    /// Maximum number of retained instances.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A pooled instance released on drop.
pub struct Pooled<'a, T> {
    pool: &'a ObjectPool<T>,
    obj: Option<T>,
}

impl<T> Pooled<'_, T> {
    /// Keep the instance instead of returning it to the pool.
    pub fn detach(mut self) -> T {
        match self.obj.take() {
            Some(obj) => obj,
            None => unreachable!("pooled object taken twice"),
        }
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object used after detach"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object used after detach"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.release(obj);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<'_, T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.obj).finish()
    }
}
