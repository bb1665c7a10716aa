//! Typed view the ingestion store produces from a wire payload (spec §3,
//! "Audio Datum"). A tagged union in place of the original's polymorphic
//! `AudioDatum`/`DawInfo`/`TrackInfo` hierarchy, per §9's "typed datums
//! in place of inheritance" design note.

#[derive(Debug, Clone, PartialEq)]
pub enum AudioDatum {
    AudioSegment {
        track: u64,
        channel: u32,
        sample_rate: u32,
        start_sample: i64,
        samples: Vec<f32>,
    },
    /// A channel with no sample content this cycle (kept distinct from
    /// `AudioSegment` so consumers can still track segment boundaries).
    SegmentNoOp {
        track: u64,
        channel: u32,
        sample_rate: u32,
        length: u32,
    },
    DawInfo {
        bpm: u32,
        ts_num: u32,
        ts_den: u32,
        looping: bool,
        loop_start_qn: f64,
        loop_end_qn: f64,
    },
    TrackInfo {
        id: u64,
        name: String,
        r: u8,
        g: u8,
        b: u8,
        a: u8,
    },
}

/// Identifies the pool slot backing a queued datum; the consumer passes
/// this back to [`crate::IngestionStore::release`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageId {
    Segment(usize),
    DawInfo(usize),
    TrackInfo(usize),
}

pub(crate) const DAW_EPSILON: f64 = 1e-9;
