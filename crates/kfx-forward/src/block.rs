//! Realtime audio block and the in-flight payload it gets coalesced into
//! (spec §3, §4.4; grounded in `SinkPlugin/BufferForwarder.h`'s
//! `AudioBlockInfo`).

use kfx_core::BLOCK_SIZE;

/// One realtime audio callback's worth of samples, owned by a pool slot
/// (C2) from capture until the coalescer has consumed it.
#[derive(Debug, Clone)]
pub struct AudioBlockInfo {
    pub track_identifier: u64,
    pub track_name: String,
    pub track_color: u32,
    pub sample_rate: u32,
    pub start_sample: i64,
    pub num_channels: u32,
    pub num_samples: usize,
    pub channel_data: [Vec<f32>; 2],
    pub bpm: u32,
    pub time_signature_numerator: u32,
    pub time_signature_denominator: u32,
    pub loop_start_qn: f64,
    pub loop_end_qn: f64,
    pub is_looping: bool,
    pub is_playing: bool,
}

impl AudioBlockInfo {
    /// Preallocated, empty block for the block-info pool. Reused across
    /// captures; the audio thread overwrites every field before forwarding.
    pub fn preallocated() -> Self {
        Self {
            track_identifier: 0,
            track_name: String::new(),
            track_color: 0,
            sample_rate: 0,
            start_sample: 0,
            num_channels: 1,
            num_samples: 0,
            channel_data: [vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]],
            bpm: 0,
            time_signature_numerator: 4,
            time_signature_denominator: 4,
            loop_start_qn: 0.0,
            loop_end_qn: 0.0,
            is_looping: false,
            is_playing: false,
        }
    }

    /// Overwrite this slot's content for a fresh capture. Never allocates
    /// when `samples[n].len() <= BLOCK_SIZE`, since the backing vectors
    /// were preallocated to that capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn fill(
        &mut self,
        track_identifier: u64,
        track_name: &str,
        track_color: u32,
        sample_rate: u32,
        start_sample: i64,
        channels: &[&[f32]],
        bpm: u32,
        time_signature_numerator: u32,
        time_signature_denominator: u32,
        is_looping: bool,
        is_playing: bool,
    ) {
        self.track_identifier = track_identifier;
        self.track_name.clear();
        self.track_name.push_str(track_name);
        self.track_color = track_color;
        self.sample_rate = sample_rate;
        self.start_sample = start_sample;
        self.num_channels = channels.len() as u32;
        self.num_samples = channels.first().map(|c| c.len()).unwrap_or(0);
        for (i, chan) in channels.iter().enumerate().take(2) {
            self.channel_data[i].clear();
            self.channel_data[i].extend_from_slice(chan);
        }
        self.bpm = bpm;
        self.time_signature_numerator = time_signature_numerator;
        self.time_signature_denominator = time_signature_denominator;
        self.is_looping = is_looping;
        self.is_playing = is_playing;
    }
}

/// A fixed-size payload being assembled by the coalescer (spec §3,
/// "Segment Payload"). Always emitted with `length == BLOCK_SIZE`: a
/// short tail is always zero-padded before it leaves the forwarder.
#[derive(Debug, Clone)]
pub struct SegmentPayload {
    pub track_identifier: u64,
    pub track_name: String,
    pub track_color: u32,
    pub daw_sample_rate: u32,
    pub daw_bpm: u32,
    pub daw_time_signature_numerator: u32,
    pub daw_time_signature_denominator: u32,
    pub daw_is_looping: bool,
    pub daw_is_playing: bool,
    pub daw_loop_start: f64,
    pub daw_loop_end: f64,
    pub start_sample: i64,
    pub channels: u32,
    pub length: usize,
    pub samples: [Vec<f32>; 2],
    /// Wall-clock instant the first sample landed in this payload, used
    /// to bound how long a partial payload may linger (spec §4.4.5).
    pub first_filled_at: Option<std::time::Instant>,
}

impl SegmentPayload {
    pub fn preallocated() -> Self {
        Self {
            track_identifier: 0,
            track_name: String::new(),
            track_color: 0,
            daw_sample_rate: 0,
            daw_bpm: 0,
            daw_time_signature_numerator: 4,
            daw_time_signature_denominator: 4,
            daw_is_looping: false,
            daw_is_playing: false,
            daw_loop_start: 0.0,
            daw_loop_end: 0.0,
            start_sample: 0,
            channels: 1,
            length: 0,
            samples: [vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]],
            first_filled_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_full(&self) -> bool {
        self.length >= BLOCK_SIZE
    }

    pub fn clear(&mut self) {
        self.length = 0;
        self.first_filled_at = None;
    }

    /// Seed metadata (track identity, DAW state, start sample) from the
    /// first contributing block — spec §4.4 rule 1, "Empty payload".
    pub fn seed_from(&mut self, block: &AudioBlockInfo, block_offset: usize) {
        self.track_identifier = block.track_identifier;
        self.track_name.clear();
        self.track_name.push_str(&block.track_name);
        self.track_color = block.track_color;
        self.daw_sample_rate = block.sample_rate;
        self.daw_bpm = block.bpm;
        self.daw_time_signature_numerator = block.time_signature_numerator;
        self.daw_time_signature_denominator = block.time_signature_denominator;
        self.daw_is_looping = block.is_looping;
        self.daw_is_playing = block.is_playing;
        self.daw_loop_start = block.loop_start_qn;
        self.daw_loop_end = block.loop_end_qn;
        self.channels = block.num_channels;
        self.start_sample = block.start_sample + block_offset as i64;
        self.length = 0;
    }

    /// Zero-pad every channel up to `BLOCK_SIZE` (spec §4.4 rules 3 & 5).
    pub fn zero_pad(&mut self) {
        for ch in 0..2usize {
            for sample in self.samples[ch][self.length..BLOCK_SIZE].iter_mut() {
                *sample = 0.0;
            }
        }
        self.length = BLOCK_SIZE;
    }

    /// Append up to `n` samples starting at `block_offset` in `block`;
    /// returns the number of samples actually appended.
    pub fn append(&mut self, block: &AudioBlockInfo, block_offset: usize) -> usize {
        if self.first_filled_at.is_none() {
            self.first_filled_at = Some(std::time::Instant::now());
        }
        let remaining_capacity = BLOCK_SIZE - self.length;
        let remaining_block = block.num_samples - block_offset;
        let n = remaining_capacity.min(remaining_block);
        let channels = block.num_channels.min(2) as usize;
        for ch in 0..channels {
            self.samples[ch][self.length..self.length + n]
                .copy_from_slice(&block.channel_data[ch][block_offset..block_offset + n]);
        }
        self.length += n;
        n
    }

    /// Flatten to the wire layout `[channel0 x BLOCK_SIZE | channel1 x BLOCK_SIZE]`.
    pub fn into_wire(self, sent_time_unix_ms: i64) -> kfx_transport::Segment {
        let mut flat = Vec::with_capacity(BLOCK_SIZE * self.channels as usize);
        for ch in 0..self.channels as usize {
            flat.extend_from_slice(&self.samples[ch][..BLOCK_SIZE]);
        }
        kfx_transport::Segment {
            track_identifier: self.track_identifier,
            track_name: self.track_name,
            track_color: self.track_color,
            daw_sample_rate: self.daw_sample_rate,
            daw_bpm: self.daw_bpm,
            daw_time_signature_numerator: self.daw_time_signature_numerator,
            daw_time_signature_denominator: self.daw_time_signature_denominator,
            daw_is_looping: self.daw_is_looping,
            daw_is_playing: self.daw_is_playing,
            daw_loop_start: self.daw_loop_start,
            daw_loop_end: self.daw_loop_end,
            daw_not_supported: false,
            segment_start_sample: self.start_sample,
            segment_sample_duration: BLOCK_SIZE as u32,
            segment_no_channels: self.channels,
            segment_audio_samples: flat,
            payload_sent_time_unix_ms: sent_time_unix_ms,
        }
    }
}
