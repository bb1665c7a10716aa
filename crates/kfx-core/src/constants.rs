//! Wire and DSP constants shared by every crate in the pipeline (spec §6).

/// Fixed number of samples per channel in a shipped [`SegmentPayload`](crate::SegmentPayload).
pub const BLOCK_SIZE: usize = 4096;

/// Zero-padding multiplier applied before the STFT transform.
pub const ZERO_PAD: usize = 2;

/// STFT analysis window length, in samples.
pub const WIN: usize = 2048;

/// Overlap factor between successive STFT windows.
pub const OVERLAP: usize = 4;

/// Floor applied to every STFT bin, in dB.
pub const MIN_DB: f32 = -64.0;

/// Default capacity of the preallocated payload / segment pools.
pub const POOL_CAP: usize = 4096;

/// Default capacity of the distribution ring buffer.
pub const RING_CAP: usize = 512;

/// Maximum sample gap tolerated for a block to be considered a continuation
/// of the currently filled payload.
pub const CONTINUATION_TOLERANCE_SAMPLES: i64 = 60;

/// Maximum number of STFT jobs submitted to the worker pool per batch.
pub const BATCH: usize = 128;

/// Maximum time a partially filled payload may wait before being flushed.
pub const MAX_PAYLOAD_IDLE_MS: u64 = 250;

/// Time without a successful send after which the sender calls `reconnect()`.
pub const RECONNECT_THRESHOLD_MS: u64 = 4000;

/// Number of bins produced by one STFT window of size [`WIN`] zero-padded by [`ZERO_PAD`].
pub const fn num_bins_per_fft() -> usize {
    (WIN * ZERO_PAD) / 2 + 1
}

/// Number of overlapping STFT windows needed to cover `num_samples` samples.
///
/// `ceil(N / WIN) * OVERLAP - (OVERLAP - 1)`, per spec §3 invariant on FFT Frames.
pub const fn num_ffts_for_samples(num_samples: usize) -> usize {
    if num_samples == 0 {
        return 1;
    }
    let windows_no_overlap = num_samples.div_ceil(WIN);
    windows_no_overlap * OVERLAP - (OVERLAP - 1)
}
