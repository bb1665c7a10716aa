//! In-process transport double used by integration tests and by
//! `kfx-station`'s `--loopback` demo mode, in place of a real wire codec.

use parking_lot::Mutex;

use crate::transport::Transport;
use crate::wire::{FrameBatchRequest, FrameBatchResponse, Segment};
use kfx_core::PipelineError;

/// Records every segment sent through it instead of putting bytes on a
/// wire; frame batch reads always answer empty, since generating frames
/// is the station's job, not the transport's.
#[derive(Default)]
pub struct LoopbackTransport {
    received: Mutex<Vec<Segment>>,
    reconnect_count: Mutex<u32>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received_segments(&self) -> Vec<Segment> {
        self.received.lock().clone()
    }

    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.lock()
    }
}

impl Transport for LoopbackTransport {
    fn send_segment(&self, payload: &Segment) -> Result<(), PipelineError> {
        self.received.lock().push(payload.clone());
        Ok(())
    }

    fn reconnect(&self) {
        *self.reconnect_count.lock() += 1;
    }

    fn get_next_audio_events(
        &self,
        request: FrameBatchRequest,
    ) -> Result<FrameBatchResponse, PipelineError> {
        Ok(FrameBatchResponse {
            new_offset: request.offset,
            server_identifier: request.server_identifier,
            frames: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segment(start_sample: i64) -> Segment {
        Segment {
            track_identifier: 1,
            track_name: "t".into(),
            track_color: 0,
            daw_sample_rate: 48000,
            daw_bpm: 120,
            daw_time_signature_numerator: 4,
            daw_time_signature_denominator: 4,
            daw_is_looping: false,
            daw_is_playing: true,
            daw_loop_start: 0.0,
            daw_loop_end: 0.0,
            daw_not_supported: false,
            segment_start_sample: start_sample,
            segment_sample_duration: 4096,
            segment_no_channels: 1,
            segment_audio_samples: vec![0.0; 4096],
            payload_sent_time_unix_ms: 0,
        }
    }

    #[test]
    fn loopback_records_sent_segments_in_order() {
        let transport = LoopbackTransport::new();
        transport.send_segment(&sample_segment(0)).unwrap();
        transport.send_segment(&sample_segment(4096)).unwrap();
        let received = transport.received_segments();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].segment_start_sample, 0);
        assert_eq!(received[1].segment_start_sample, 4096);
    }

    #[test]
    fn reconnect_is_idempotent_but_counted() {
        let transport = LoopbackTransport::new();
        transport.reconnect();
        transport.reconnect();
        assert_eq!(transport.reconnect_count(), 2);
    }
}
