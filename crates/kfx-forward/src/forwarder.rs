//! Coalescing forwarder threads (spec §4.4, C4). Grounded in
//! `SinkPlugin/BufferForwarder.{h,cpp}`: one audio-thread-facing API plus
//! a coalescer thread and a sender thread, each waiting on a condition
//! variable with a one-second timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use kfx_core::{IndexFifo, Pool};
use kfx_transport::Transport;

use crate::block::{AudioBlockInfo, SegmentPayload};

const NUM_PREALLOCATED_BLOCK_INFOS: usize = 16;
const NUM_PREALLOCATED_PAYLOADS: usize = 8;
const TO_COALESCE_CAPACITY: usize = 64;
const MAX_BLOCKS_PER_DRAIN: usize = 10;
const FORWARDER_THREAD_MAX_WAIT: Duration = Duration::from_secs(1);

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A payload either drawn from the preallocated pool or, rarely, heap
/// allocated when the pool was exhausted (spec §4.4, "Back-pressure").
enum PayloadHandle {
    Pooled(usize),
    Heap(Box<SegmentPayload>),
}

struct Shared {
    block_pool: Pool<AudioBlockInfo>,
    to_coalesce: IndexFifo,
    payload_pool: Pool<SegmentPayload>,
    to_send: Mutex<VecDeque<PayloadHandle>>,
    to_send_cv: Condvar,
    coalesce_wake: Condvar,
    coalesce_wake_mutex: Mutex<()>,
    currently_filled: Mutex<Option<PayloadHandle>>,
    stop: AtomicBool,
    transport: Arc<dyn Transport>,
    last_success_unix_ms: AtomicI64,
}

impl Shared {
    fn payload_ref(handle: &PayloadHandle, pool: &Pool<SegmentPayload>) -> *mut SegmentPayload {
        match handle {
            // SAFETY: the handle's owner holds exclusive logical access;
            // `currently_filled`/`to_send` are never aliased concurrently.
            PayloadHandle::Pooled(idx) => unsafe { pool.slot(*idx) as *mut _ },
            PayloadHandle::Heap(boxed) => boxed.as_ref() as *const _ as *mut _,
        }
    }

    fn reserve_payload(&self) -> PayloadHandle {
        match self.payload_pool.try_reserve() {
            Some((idx, slot)) => {
                slot.clear();
                PayloadHandle::Pooled(idx)
            }
            None => {
                log::warn!("payload pool exhausted, heap-allocating a payload");
                let mut payload = SegmentPayload::preallocated();
                payload.clear();
                PayloadHandle::Heap(Box::new(payload))
            }
        }
    }

    fn release_payload(&self, handle: PayloadHandle) {
        if let PayloadHandle::Pooled(idx) = handle {
            self.payload_pool.release(idx);
        }
    }
}

/// Sink-side coalescing forwarder. Owns the block pool, payload pool, and
/// the two background threads that turn blocks into shipped payloads.
pub struct CoalescingForwarder {
    shared: Arc<Shared>,
    coalescer_thread: Mutex<Option<JoinHandle<()>>>,
    sender_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CoalescingForwarder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(Shared {
            block_pool: Pool::new(NUM_PREALLOCATED_BLOCK_INFOS, |_| AudioBlockInfo::preallocated()),
            to_coalesce: IndexFifo::new(TO_COALESCE_CAPACITY),
            payload_pool: Pool::new(NUM_PREALLOCATED_PAYLOADS, |_| SegmentPayload::preallocated()),
            to_send: Mutex::new(VecDeque::new()),
            to_send_cv: Condvar::new(),
            coalesce_wake: Condvar::new(),
            coalesce_wake_mutex: Mutex::new(()),
            currently_filled: Mutex::new(None),
            stop: AtomicBool::new(false),
            transport,
            last_success_unix_ms: AtomicI64::new(now_unix_ms()),
        });

        let coalescer_shared = shared.clone();
        let coalescer_thread = thread::spawn(move || coalesce_loop(coalescer_shared));

        let sender_shared = shared.clone();
        let sender_thread = thread::spawn(move || send_loop(sender_shared));

        Self {
            shared,
            coalescer_thread: Mutex::new(Some(coalescer_thread)),
            sender_thread: Mutex::new(Some(sender_thread)),
        }
    }

    /// Audio-thread API: reserve a free block slot. Returns `None` (never
    /// blocks, never allocates) when the pool is exhausted.
    pub fn get_free_block_slot(&self) -> Option<(usize, &mut AudioBlockInfo)> {
        self.shared.block_pool.try_reserve()
    }

    /// Audio-thread API: hand a filled block off to the coalescer. Never
    /// blocks; drops and releases the slot with a logged warning if the
    /// handoff FIFO is full.
    pub fn forward_block(&self, index: usize) {
        if !self.shared.to_coalesce.try_push(index) {
            log::warn!("to-coalesce FIFO full, dropping audio block");
            self.shared.block_pool.release(index);
            return;
        }
        self.shared.coalesce_wake.notify_one();
    }

    pub fn pending_to_send(&self) -> usize {
        self.shared.to_send.lock().unwrap().len()
    }

    /// Set a stop flag, wake both condition variables, and join the
    /// coalescer then the sender, in that order (spec §4.4, "Shutdown").
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.coalesce_wake.notify_all();
        self.shared.to_send_cv.notify_all();
        if let Some(handle) = self.coalescer_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.sender_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CoalescingForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn coalesce_loop(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        {
            let guard = shared.coalesce_wake_mutex.lock().unwrap();
            let _ = shared
                .coalesce_wake
                .wait_timeout(guard, FORWARDER_THREAD_MAX_WAIT)
                .unwrap();
        }
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let batch = shared.to_coalesce.try_pop_batch(MAX_BLOCKS_PER_DRAIN);
        for block_index in batch {
            // SAFETY: the index came off the to-coalesce FIFO, which only
            // ever carries indices the coalescer now owns exclusively.
            let block = unsafe { shared.block_pool.slot(block_index) };
            process_block(&shared, block);
            shared.block_pool.release(block_index);
        }

        check_idle_flush(&shared);
    }

    // Drain whatever remains, flushing a trailing partial payload.
    let batch = shared.to_coalesce.try_pop_batch(TO_COALESCE_CAPACITY);
    for block_index in batch {
        let block = unsafe { shared.block_pool.slot(block_index) };
        process_block(&shared, block);
        shared.block_pool.release(block_index);
    }
    let mut current = shared.currently_filled.lock().unwrap();
    if let Some(mut handle) = current.take() {
        flush_handle(&shared, &mut handle, true);
        enqueue_for_send(&shared, handle);
    }
}

fn process_block(shared: &Arc<Shared>, block: &AudioBlockInfo) {
    let mut offset = 0usize;
    loop {
        let mut current_guard = shared.currently_filled.lock().unwrap();
        if current_guard.is_none() {
            *current_guard = Some(shared.reserve_payload());
        }
        let handle = current_guard.as_mut().unwrap();
        let payload_ptr = Shared::payload_ref(handle, &shared.payload_pool);
        // SAFETY: `current_guard` holds the mutex, so no other thread can
        // observe or mutate this payload concurrently.
        let payload = unsafe { &mut *payload_ptr };

        if payload.is_empty() {
            payload.seed_from(block, offset);
        } else {
            let predicted_start = payload.start_sample + payload.length as i64;
            let block_start_here = block.start_sample + offset as i64;
            if (block_start_here - predicted_start).abs()
                > kfx_core::CONTINUATION_TOLERANCE_SAMPLES
            {
                // Discontinuity: zero-pad and flush what we have, then
                // retry this block against a fresh payload.
                payload.zero_pad();
                let handle = current_guard.take().unwrap();
                drop(current_guard);
                enqueue_for_send(shared, handle);
                continue;
            }
        }

        let appended = payload.append(block, offset);
        offset += appended;
        let full = payload.is_full();
        drop(current_guard);

        if full {
            let mut current_guard = shared.currently_filled.lock().unwrap();
            if let Some(handle) = current_guard.take() {
                enqueue_for_send(shared, handle);
            }
        }

        if offset >= block.num_samples {
            break;
        }
    }
}

fn flush_handle(shared: &Arc<Shared>, handle: &mut PayloadHandle, zero_pad: bool) {
    let ptr = Shared::payload_ref(handle, &shared.payload_pool);
    let payload = unsafe { &mut *ptr };
    if zero_pad && !payload.is_full() {
        payload.zero_pad();
    }
}

fn enqueue_for_send(shared: &Arc<Shared>, handle: PayloadHandle) {
    shared.to_send.lock().unwrap().push_back(handle);
    shared.to_send_cv.notify_one();
}

fn check_idle_flush(shared: &Arc<Shared>) {
    let mut current_guard = shared.currently_filled.lock().unwrap();
    let Some(handle) = current_guard.as_mut() else {
        return;
    };
    let ptr = Shared::payload_ref(handle, &shared.payload_pool);
    let payload = unsafe { &mut *ptr };
    let Some(first_filled) = payload.first_filled_at else {
        return;
    };
    if first_filled.elapsed() >= Duration::from_millis(kfx_core::MAX_PAYLOAD_IDLE_MS) {
        payload.zero_pad();
        let handle = current_guard.take().unwrap();
        drop(current_guard);
        enqueue_for_send(shared, handle);
    }
}

fn send_loop(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        let handle = {
            let mut guard = shared.to_send.lock().unwrap();
            loop {
                if let Some(handle) = guard.pop_front() {
                    break Some(handle);
                }
                if shared.stop.load(Ordering::Acquire) {
                    break None;
                }
                let (next_guard, timeout) = shared
                    .to_send_cv
                    .wait_timeout(guard, FORWARDER_THREAD_MAX_WAIT)
                    .unwrap();
                guard = next_guard;
                if timeout.timed_out() && shared.stop.load(Ordering::Acquire) {
                    break None;
                }
            }
        };

        let Some(handle) = handle else { continue };
        send_one(&shared, handle);
    }
}

fn send_one(shared: &Arc<Shared>, handle: PayloadHandle) {
    let payload = match handle {
        PayloadHandle::Pooled(idx) => {
            let slot = unsafe { shared.payload_pool.slot(idx) };
            let owned = std::mem::replace(slot, SegmentPayload::preallocated());
            shared.payload_pool.release(idx);
            owned
        }
        PayloadHandle::Heap(boxed) => *boxed,
    };

    let sent_time = now_unix_ms();
    let wire = payload.into_wire(sent_time);
    match shared.transport.send_segment(&wire) {
        Ok(()) => {
            shared.last_success_unix_ms.store(sent_time, Ordering::Release);
        }
        Err(err) => {
            log::warn!("segment send failed: {err}");
            let last_success = shared.last_success_unix_ms.load(Ordering::Acquire);
            if (sent_time - last_success) as u64 > kfx_core::RECONNECT_THRESHOLD_MS {
                shared.transport.reconnect();
            }
        }
    }
}
