//! Lock-free single-producer/single-consumer index FIFO (spec §4.1, C1).
//!
//! Hands preallocated pool indices from a realtime producer thread to a
//! background consumer thread without allocating or locking. `try_push`
//! never blocks; a full queue drops the index and the caller is expected
//! to log a warning and move on.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache-line aligned to avoid false sharing between producer and consumer.
#[repr(align(64))]
pub struct IndexFifo {
    slots: Box<[UnsafeCell<usize>]>,
    capacity: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// SAFETY: `slots` is only ever written by the single producer at `write_pos`
// and read by the single consumer at `read_pos`; the atomics establish the
// happens-before edges between the two sides.
unsafe impl Send for IndexFifo {}
unsafe impl Sync for IndexFifo {}

impl IndexFifo {
    /// Create a FIFO with the given fixed capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "IndexFifo capacity must be non-zero");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(0usize))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            capacity,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Number of indices currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push one index. Producer-only. Never blocks: returns `false` if the
    /// queue is full, in which case the caller must drop the value (and
    /// should log it — the audio thread must never wait here).
    #[inline]
    pub fn try_push(&self, index: usize) -> bool {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.capacity {
            return false;
        }
        let slot = write % self.capacity;
        // SAFETY: only the producer writes, and this slot was vacated by the
        // consumer before `read` passed it.
        unsafe {
            *self.slots[slot].get() = index;
        }
        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Drain up to `max` queued indices in FIFO order. Consumer-only.
    pub fn try_pop_batch(&self, max: usize) -> Vec<usize> {
        let write = self.write_pos.load(Ordering::Acquire);
        let mut read = self.read_pos.load(Ordering::Relaxed);
        let available = write.wrapping_sub(read);
        let to_pop = available.min(max);
        let mut out = Vec::with_capacity(to_pop);
        for _ in 0..to_pop {
            let slot = read % self.capacity;
            // SAFETY: the producer will not touch this slot again until
            // `read_pos` is published below.
            out.push(unsafe { *self.slots[slot].get() });
            read = read.wrapping_add(1);
        }
        if to_pop > 0 {
            self.read_pos.store(read, Ordering::Release);
        }
        out
    }
}
