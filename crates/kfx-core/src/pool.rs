//! Bounded preallocated pool (spec §4.2, C2).
//!
//! A fixed-size array of reusable slots handed out by index. The free set
//! is a mutex-guarded stack of indices; the mutex is only ever held for an
//! O(1) push/pop, so `try_reserve` is safe to call from latency-sensitive
//! code (the realtime audio thread included).

use std::cell::UnsafeCell;
use parking_lot::Mutex;

pub struct Pool<T> {
    slots: Box<[UnsafeCell<T>]>,
    free: Mutex<Vec<usize>>,
    capacity: usize,
}

// SAFETY: each index is owned by at most one caller at a time — the free
// stack is the single source of truth for who may touch a slot.
unsafe impl<T: Send> Sync for Pool<T> {}
unsafe impl<T: Send> Send for Pool<T> {}

impl<T> Pool<T> {
    /// Build a pool of `capacity` slots, each initialised by `make(index)`.
    pub fn new(capacity: usize, mut make: impl FnMut(usize) -> T) -> Self {
        let slots = (0..capacity)
            .map(|i| UnsafeCell::new(make(i)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        // LIFO free stack, highest index first pops lowest index first —
        // matches the mutex-guarded free-set description in spec §4.2.
        let free = (0..capacity).rev().collect();
        Self {
            slots,
            free: Mutex::new(free),
            capacity,
        }
    }

    /// Fixed capacity of the pool.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve one free slot by index. Returns `None` if the pool is
    /// exhausted — the caller must surface a resource-exhausted error, it
    /// must never block.
    pub fn try_reserve(&self) -> Option<(usize, &mut T)> {
        let index = self.free.lock().pop()?;
        // SAFETY: the index was popped from the free set, so no other
        // caller holds a reference to this slot until `release` is called.
        let slot = unsafe { &mut *self.slots[index].get() };
        Some((index, slot))
    }

    /// Return `index` to the free set. Must be called exactly once per
    /// successful `try_reserve`.
    pub fn release(&self, index: usize) {
        debug_assert!(index < self.capacity);
        self.free.lock().push(index);
    }

    /// Borrow a slot the caller already holds the index for (e.g. to read
    /// after a `release`-free internal hand-off). Not reference counted —
    /// callers are responsible for not aliasing a reserved slot.
    ///
    /// # Safety
    /// The caller must hold exclusive logical ownership of `index` (i.e.
    /// it must currently be reserved, not sitting in the free set).
    pub unsafe fn slot(&self, index: usize) -> &mut T {
        unsafe { &mut *self.slots[index].get() }
    }

    /// Number of slots currently available for reservation.
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_roundtrip() {
        let pool = Pool::new(4, |_| 0u32);
        assert_eq!(pool.free_count(), 4);

        let (idx_a, slot_a) = pool.try_reserve().unwrap();
        *slot_a = 42;
        let (idx_b, _) = pool.try_reserve().unwrap();
        assert_ne!(idx_a, idx_b);
        assert_eq!(pool.free_count(), 2);

        pool.release(idx_a);
        pool.release(idx_b);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = Pool::new(2, |_| 0u8);
        let a = pool.try_reserve().unwrap();
        let b = pool.try_reserve().unwrap();
        assert!(pool.try_reserve().is_none());
        pool.release(a.0);
        pool.release(b.0);
    }

    /// Property 1 — pool reuse: for any capacity N, after any sequence of
    /// reserve/release operations ending with equal counts, N free slots
    /// remain and the next N reserves all succeed.
    #[test]
    fn property_pool_reuse() {
        let pool: Pool<u8> = Pool::new(16, |_| 0);
        for _ in 0..500 {
            let (idx, _) = pool.try_reserve().unwrap();
            pool.release(idx);
        }
        assert_eq!(pool.free_count(), 16);
        let mut reserved = Vec::new();
        for _ in 0..16 {
            reserved.push(pool.try_reserve().unwrap().0);
        }
        assert!(pool.try_reserve().is_none());
        for idx in reserved {
            pool.release(idx);
        }
    }
}
