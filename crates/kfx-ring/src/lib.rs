//! Distribution ring buffer (spec §4.7, C7). Grounded in
//! `HeadlessAudioBroadcast/ServerFftsRingBuffer.cpp`: a fixed-capacity
//! vector of frames overwritten in place as a ring, a monotonic write
//! offset, and a pool of reusable response structs so catch-up reads
//! never allocate on the hot path.

use parking_lot::Mutex;
use rand::Rng;

use kfx_transport::{FrameBatchResponse, WireFrame};

struct RingState {
    entries: Vec<Option<WireFrame>>,
    last_index: Option<usize>,
    last_offset: u64,
    used_size: usize,
    generation: u64,
    free_responses: Vec<FrameBatchResponse>,
}

/// Bounded, generation-tagged ring of completed STFT frames.
pub struct DistributionRing {
    capacity: usize,
    state: Mutex<RingState>,
}

impl DistributionRing {
    pub fn new(capacity: usize) -> Self {
        let generation = rand::rng().random::<u64>();
        Self {
            capacity,
            state: Mutex::new(RingState {
                entries: (0..capacity).map(|_| None).collect(),
                last_index: None,
                last_offset: 0,
                used_size: 0,
                generation,
                free_responses: Vec::new(),
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn last_offset(&self) -> u64 {
        self.state.lock().last_offset
    }

    /// Append a completed frame. Never blocks beyond the short critical
    /// section; overwrites the oldest slot once the ring is full.
    pub fn write(&self, frame: WireFrame) {
        let mut state = self.state.lock();
        if state.used_size != self.capacity {
            state.used_size += 1;
        }
        state.last_offset += 1;
        let next_index = match state.last_index {
            None => 0,
            Some(i) if i + 1 == self.capacity => 0,
            Some(i) => i + 1,
        };
        state.last_index = Some(next_index);
        state.entries[next_index] = Some(frame);
    }

    /// Catch-up read from `(client_generation, client_offset)`. Reuses a
    /// pooled response struct when one is available; callers should
    /// return it via [`Self::release`] once consumed.
    pub fn read(&self, client_generation: u64, client_offset: u64) -> FrameBatchResponse {
        let mut state = self.state.lock();
        let mut response = state.free_responses.pop().unwrap_or_else(|| FrameBatchResponse {
            new_offset: 0,
            server_identifier: 0,
            frames: Vec::new(),
        });
        response.frames.clear();
        response.server_identifier = state.generation;
        response.new_offset = state.last_offset + 1;

        if state.used_size == 0 {
            return response;
        }

        let oldest_available = state
            .last_offset
            .saturating_sub(state.used_size as u64 - 1)
            .max(1);
        let last_offset = state.last_offset;
        let reset = client_generation != state.generation || client_offset > last_offset + 1;
        let start = if reset {
            oldest_available
        } else {
            client_offset.max(oldest_available)
        };

        // Caller is already caught up (`start == last_offset + 1`): nothing
        // to scan, and computing a ring index for an offset past the last
        // write would underflow `last_offset - offset`.
        if start > last_offset {
            return response;
        }

        let last_index = state.last_index.expect("used_size > 0 implies a write happened");
        let mut ring_index = ring_index_for_offset(last_index, last_offset, start, self.capacity);
        let mut offset = start;
        while offset <= last_offset {
            if let Some(frame) = &state.entries[ring_index] {
                response.frames.push(frame.clone());
            }
            offset += 1;
            ring_index = if ring_index + 1 == self.capacity { 0 } else { ring_index + 1 };
        }
        response
    }

    /// Return a consumed response struct to the free-list for reuse.
    pub fn release(&self, response: FrameBatchResponse) {
        self.state.lock().free_responses.push(response);
    }
}

/// `(last_index - (last_offset - offset)) mod capacity`, per the
/// resolved reverse-lookup strategy (offset-to-ring-index mapping).
fn ring_index_for_offset(last_index: usize, last_offset: u64, offset: u64, capacity: usize) -> usize {
    let diff = (last_offset - offset) as i64;
    let cap = capacity as i64;
    let idx = (last_index as i64 - diff).rem_euclid(cap);
    idx as usize
}
