//! The ingestion store itself (spec §4.5, C5). Grounded in
//! `AudioTransport/AudioDataStore.h`: three preallocated pools (segments,
//! DAW info, track info), a blocking delivery queue, and deduplication of
//! metadata keyed on the last-seen value.
//!
//! Not thread-safe for concurrent `parse` calls, mirroring the original's
//! single-threaded-server assumption for `trackInfoByIdentifier` /
//! `lastDawInfo` — callers serialize parsing on one thread.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use kfx_core::{Pool, PipelineError, PipelineResult};
use kfx_transport::Segment;

use crate::datum::{AudioDatum, StorageId, DAW_EPSILON};

const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
struct LastDawInfo {
    bpm: u32,
    ts_num: u32,
    ts_den: u32,
    looping: bool,
    loop_start_qn: f64,
    loop_end_qn: f64,
}

impl LastDawInfo {
    fn differs_from(&self, payload: &Segment) -> bool {
        self.bpm != payload.daw_bpm
            || self.ts_num != payload.daw_time_signature_numerator
            || self.ts_den != payload.daw_time_signature_denominator
            || self.looping != payload.daw_is_looping
            || (self.loop_start_qn - payload.daw_loop_start).abs() > DAW_EPSILON
            || (self.loop_end_qn - payload.daw_loop_end).abs() > DAW_EPSILON
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LastTrackInfo {
    name: String,
    color: u32,
}

pub struct IngestionStore {
    segment_pool: Pool<()>,
    daw_info_pool: Pool<()>,
    track_info_pool: Pool<()>,
    queue: Mutex<VecDeque<(AudioDatum, StorageId)>>,
    queue_cv: Condvar,
    stopping: AtomicBool,
    last_daw_info: Mutex<Option<LastDawInfo>>,
    last_track_info: Mutex<HashMap<u64, LastTrackInfo>>,
}

impl IngestionStore {
    pub fn new(preallocated_capacity: usize) -> Self {
        Self {
            segment_pool: Pool::new(preallocated_capacity, |_| ()),
            daw_info_pool: Pool::new(preallocated_capacity, |_| ()),
            track_info_pool: Pool::new(preallocated_capacity, |_| ()),
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            stopping: AtomicBool::new(false),
            last_daw_info: Mutex::new(None),
            last_track_info: Mutex::new(HashMap::new()),
        }
    }

    /// Number of free slots left in the segment pool; a test utility
    /// mirroring `countFreePreallocatedStructs`.
    pub fn free_segment_slots(&self) -> usize {
        self.segment_pool.free_count()
    }

    /// Parse one inbound payload into zero or more typed datums, enqueued
    /// for [`Self::wait_for_datum`].
    pub fn parse(&self, payload: &Segment) -> PipelineResult<()> {
        if payload.segment_sample_duration == 0 {
            self.emit_segment_no_ops(payload);
            self.maybe_emit_daw_info(payload);
            self.maybe_emit_track_info(payload);
            return Ok(());
        }

        let duration = payload.segment_sample_duration as usize;
        let channels = payload.segment_no_channels as usize;
        if payload.segment_audio_samples.len() != duration * channels {
            return Err(PipelineError::InvalidArgument(format!(
                "samples.len() {} does not match duration*channels {}",
                payload.segment_audio_samples.len(),
                duration * channels
            )));
        }

        let mut reserved = Vec::with_capacity(channels);
        for _ in 0..channels {
            match self.segment_pool.try_reserve() {
                Some((idx, _)) => reserved.push(idx),
                None => {
                    for idx in reserved {
                        self.segment_pool.release(idx);
                    }
                    return Err(PipelineError::ResourceExhausted(
                        "segment pool exhausted".into(),
                    ));
                }
            }
        }

        for (channel, idx) in reserved.into_iter().enumerate() {
            let start = channel * duration;
            let samples = payload.segment_audio_samples[start..start + duration].to_vec();
            let datum = AudioDatum::AudioSegment {
                track: payload.track_identifier,
                channel: channel as u32,
                sample_rate: payload.daw_sample_rate,
                start_sample: payload.segment_start_sample,
                samples,
            };
            self.enqueue(datum, StorageId::Segment(idx));
        }

        self.maybe_emit_daw_info(payload);
        self.maybe_emit_track_info(payload);
        Ok(())
    }

    /// A zero-duration payload still carries per-channel metadata: emit one
    /// no-op datum per channel so consumers see the boundary without any
    /// samples to process.
    fn emit_segment_no_ops(&self, payload: &Segment) {
        let channels = payload.segment_no_channels as usize;
        for channel in 0..channels {
            let Some((idx, _)) = self.segment_pool.try_reserve() else {
                log::warn!("segment pool exhausted, dropping no-op for channel {channel}");
                continue;
            };
            self.enqueue(
                AudioDatum::SegmentNoOp {
                    track: payload.track_identifier,
                    channel: channel as u32,
                    sample_rate: payload.daw_sample_rate,
                    length: 0,
                },
                StorageId::Segment(idx),
            );
        }
    }

    fn maybe_emit_daw_info(&self, payload: &Segment) {
        let mut last_guard = self.last_daw_info.lock().unwrap();
        let current = LastDawInfo {
            bpm: payload.daw_bpm,
            ts_num: payload.daw_time_signature_numerator,
            ts_den: payload.daw_time_signature_denominator,
            looping: payload.daw_is_looping,
            loop_start_qn: payload.daw_loop_start,
            loop_end_qn: payload.daw_loop_end,
        };
        let differs = match *last_guard {
            Some(last) => last.differs_from(payload),
            None => true,
        };
        if !differs {
            return;
        }
        let Some((idx, _)) = self.daw_info_pool.try_reserve() else {
            log::warn!("daw info pool exhausted, dropping update");
            return;
        };
        *last_guard = Some(current);
        drop(last_guard);
        self.enqueue(
            AudioDatum::DawInfo {
                bpm: current.bpm,
                ts_num: current.ts_num,
                ts_den: current.ts_den,
                looping: current.looping,
                loop_start_qn: current.loop_start_qn,
                loop_end_qn: current.loop_end_qn,
            },
            StorageId::DawInfo(idx),
        );
    }

    fn maybe_emit_track_info(&self, payload: &Segment) {
        let current = LastTrackInfo {
            name: payload.track_name.clone(),
            color: payload.track_color,
        };
        let mut map = self.last_track_info.lock().unwrap();
        if map.get(&payload.track_identifier) == Some(&current) {
            return;
        }
        let Some((idx, _)) = self.track_info_pool.try_reserve() else {
            log::warn!("track info pool exhausted, dropping update");
            return;
        };
        map.insert(payload.track_identifier, current.clone());
        drop(map);

        let [r, g, b, a] = payload.track_color.to_be_bytes();
        self.enqueue(
            AudioDatum::TrackInfo {
                id: payload.track_identifier,
                name: current.name,
                r,
                g,
                b,
                a,
            },
            StorageId::TrackInfo(idx),
        );
    }

    fn enqueue(&self, datum: AudioDatum, storage_id: StorageId) {
        self.queue.lock().unwrap().push_back((datum, storage_id));
        self.queue_cv.notify_one();
    }

    /// Blocks up to one second for the next datum; returns `None` on
    /// timeout or once [`Self::stop`] has been called.
    pub fn wait_for_datum(&self) -> Option<(AudioDatum, StorageId)> {
        let mut guard = self.queue.lock().unwrap();
        loop {
            if let Some(item) = guard.pop_front() {
                return Some(item);
            }
            if self.stopping.load(Ordering::Acquire) {
                return None;
            }
            let (next_guard, timeout) = self.queue_cv.wait_timeout(guard, WAIT_TIMEOUT).unwrap();
            guard = next_guard;
            if timeout.timed_out() && guard.is_empty() {
                if self.stopping.load(Ordering::Acquire) {
                    return None;
                }
                continue;
            }
        }
    }

    /// Returns a storage slot to its pool. Must be called exactly once
    /// per datum returned by [`Self::wait_for_datum`].
    pub fn release(&self, storage_id: StorageId) {
        match storage_id {
            StorageId::Segment(idx) => self.segment_pool.release(idx),
            StorageId::DawInfo(idx) => self.daw_info_pool.release(idx),
            StorageId::TrackInfo(idx) => self.track_info_pool.release(idx),
        }
    }

    /// Wakes every waiter; subsequent and in-flight `wait_for_datum`
    /// calls return `None`.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.queue_cv.notify_all();
    }

    pub fn has_stopped(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Segment {
        let samples: Vec<f32> = (0..4000).map(|i| i as f32).collect();
        Segment {
            track_identifier: 42,
            track_name: "Kick".into(),
            track_color: 0xAABBCCDD,
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
            segment_sample_duration: 2000,
            segment_no_channels: 2,
            segment_audio_samples: samples,
            payload_sent_time_unix_ms: 0,
        }
    }

    /// Scenario S1.
    #[test]
    fn s1_parse_emits_segments_then_daw_then_track_info() {
        let store = IngestionStore::new(10);
        let payload = sample_payload();
        store.parse(&payload).unwrap();

        let (datum1, id1) = store.wait_for_datum().unwrap();
        match datum1 {
            AudioDatum::AudioSegment {
                channel,
                start_sample,
                samples,
                ..
            } => {
                assert_eq!(channel, 0);
                assert_eq!(start_sample, 100);
                assert_eq!(samples, (0..2000).map(|i| i as f32).collect::<Vec<_>>());
            }
            other => panic!("unexpected datum: {other:?}"),
        }
        store.release(id1);

        let (datum2, id2) = store.wait_for_datum().unwrap();
        match datum2 {
            AudioDatum::AudioSegment { channel, samples, .. } => {
                assert_eq!(channel, 1);
                assert_eq!(samples, (2000..4000).map(|i| i as f32).collect::<Vec<_>>());
            }
            other => panic!("unexpected datum: {other:?}"),
        }
        store.release(id2);

        let (datum3, id3) = store.wait_for_datum().unwrap();
        assert!(matches!(datum3, AudioDatum::DawInfo { bpm: 120, .. }));
        let (datum4, id4) = store.wait_for_datum().unwrap();
        assert!(matches!(datum4, AudioDatum::TrackInfo { id: 42, .. }));

        // Re-parse without releasing DAW/track info slots: dedup kicks in,
        // only segments are emitted this time.
        store.parse(&payload).unwrap();
        for _ in 0..2 {
            let (datum, id) = store.wait_for_datum().unwrap();
            assert!(matches!(datum, AudioDatum::AudioSegment { .. }));
            store.release(id);
        }

        store.release(id3);
        store.release(id4);
    }

    #[test]
    fn duration_channel_mismatch_is_invalid_argument() {
        let store = IngestionStore::new(4);
        let mut payload = sample_payload();
        payload.segment_audio_samples.pop();
        let err = store.parse(&payload).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[test]
    fn segment_pool_exhaustion_is_resource_exhausted() {
        let store = IngestionStore::new(1);
        let payload = sample_payload();
        let err = store.parse(&payload).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceExhausted(_)));
        assert_eq!(store.free_segment_slots(), 1);
    }

    #[test]
    fn zero_duration_payload_emits_per_channel_no_ops() {
        let store = IngestionStore::new(10);
        let mut payload = sample_payload();
        payload.segment_sample_duration = 0;
        payload.segment_audio_samples.clear();
        store.parse(&payload).unwrap();

        for expected_channel in 0..2 {
            let (datum, id) = store.wait_for_datum().unwrap();
            match datum {
                AudioDatum::SegmentNoOp { channel, length, .. } => {
                    assert_eq!(channel, expected_channel);
                    assert_eq!(length, 0);
                }
                other => panic!("unexpected datum: {other:?}"),
            }
            store.release(id);
        }

        let (daw_datum, daw_id) = store.wait_for_datum().unwrap();
        assert!(matches!(daw_datum, AudioDatum::DawInfo { .. }));
        let (track_datum, track_id) = store.wait_for_datum().unwrap();
        assert!(matches!(track_datum, AudioDatum::TrackInfo { .. }));
        store.release(daw_id);
        store.release(track_id);
    }

    #[test]
    fn stop_wakes_waiters_with_none() {
        let store = IngestionStore::new(4);
        store.stop();
        assert!(store.wait_for_datum().is_none());
    }
}
