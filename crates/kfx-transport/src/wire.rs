//! Wire record shapes (spec §6). These are the self-describing records
//! that cross the opaque transport boundary; the framing itself is a
//! non-goal, so these are plain serde-derived structs rather than a
//! generated protobuf binding.

use serde::{Deserialize, Serialize};

/// Self-describing wire record for one forwarded audio segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
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
    pub daw_not_supported: bool,
    pub segment_start_sample: i64,
    pub segment_sample_duration: u32,
    pub segment_no_channels: u32,
    pub segment_audio_samples: Vec<f32>,
    pub payload_sent_time_unix_ms: i64,
}

impl Segment {
    /// `track_name` is capped at 128 bytes on the wire (spec §6).
    pub const MAX_TRACK_NAME_BYTES: usize = 128;
}

/// Catch-up pull request for visualiser clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameBatchRequest {
    pub offset: u64,
    pub server_identifier: u64,
}

/// One STFT frame as shipped to a visualiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub track_identifier: u64,
    pub track_name: String,
    pub track_color: u32,
    pub total_no_channels: u32,
    pub channel_index: u32,
    pub sample_rate: u32,
    pub segment_start_sample: i64,
    pub segment_sample_length: u32,
    pub no_ffts: u32,
    pub fft_data: Vec<f32>,
    pub daw_bpm: f32,
    pub daw_time_signature_numerator: i32,
    pub sent_time_unix_ms: i64,
}

/// Response to a [`FrameBatchRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameBatchResponse {
    pub new_offset: u64,
    pub server_identifier: u64,
    pub frames: Vec<WireFrame>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_roundtrips_through_json() {
        let seg = Segment {
            track_identifier: 7,
            track_name: "Kick".into(),
            track_color: 0xFF00_00FF,
            daw_sample_rate: 48000,
            daw_bpm: 120,
            daw_time_signature_numerator: 4,
            daw_time_signature_denominator: 4,
            daw_is_looping: false,
            daw_is_playing: true,
            daw_loop_start: 0.0,
            daw_loop_end: 0.0,
            daw_not_supported: false,
            segment_start_sample: 100,
            segment_sample_duration: 4096,
            segment_no_channels: 2,
            segment_audio_samples: vec![0.0; 8192],
            payload_sent_time_unix_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&seg).unwrap();
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.track_identifier, 7);
        assert_eq!(back.segment_audio_samples.len(), 8192);
    }
}
