//! Station process entry point. Grounded in the teacher's binary
//! (`env_logger::init` plus a small `clap`-derived CLI) and in
//! `HeadlessAudioBroadcast`'s server loop: two worker threads drain the
//! ingestion queue, run the STFT pool, publish completed frames to the
//! distribution ring, and broadcast typed tasks for anything else
//! listening on the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;

use kfx_bus::{
    BpmUpdateTask, Task, TaskBus, TaskPayload, TimeSignatureUpdateTask, TrackInfoUpdateTask,
};
use kfx_core::{num_bins_per_fft, POOL_CAP, RING_CAP};
use kfx_forward::CoalescingForwarder;
use kfx_ingest::{AudioDatum, IngestionStore};
use kfx_metrics::ProcessingTimer;
use kfx_ring::DistributionRing;
use kfx_stft::StftWorkerPool;
use kfx_transport::{LoopbackTransport, WireFrame};

const NUM_INGESTION_WORKERS: usize = 2;

/// Kholors Station: ingests forwarded audio segments, runs the STFT
/// worker pool over them, and serves the result ring to visualiser
/// clients.
#[derive(Parser, Debug)]
#[command(name = "kfx-station", about = "Audio-visualisation pipeline station")]
struct Cli {
    /// Port a real transport would bind to (opaque byte transport is a
    /// non-goal here; this is informational only without `--loopback`).
    #[arg(long, default_value_t = 9000)]
    listen_port: u16,

    /// Capacity of the distribution ring buffer (C7).
    #[arg(long, default_value_t = RING_CAP)]
    ring_capacity: usize,

    /// Capacity of the ingestion station's preallocated pools (C5).
    #[arg(long, default_value_t = POOL_CAP)]
    pool_capacity: usize,

    /// `env_logger` filter level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run an in-process demo: push synthetic audio blocks through a
    /// coalescing forwarder and a loopback transport into this station.
    #[arg(long)]
    loopback: bool,
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Clone, Default)]
struct TrackMeta {
    name: String,
    color: u32,
}

struct Station {
    bus: Arc<TaskBus>,
    store: Arc<IngestionStore>,
    stft: Arc<StftWorkerPool>,
    ring: Arc<DistributionRing>,
    metrics: Arc<ProcessingTimer>,
    last_bpm: Mutex<Option<(u32, u32, u32)>>,
    last_track_meta: Mutex<HashMap<u64, TrackMeta>>,
    track_meta: Mutex<HashMap<u64, TrackMeta>>,
}

impl Station {
    fn new(pool_capacity: usize, ring_capacity: usize, bus: Arc<TaskBus>) -> Arc<Self> {
        let metrics = ProcessingTimer::new(bus.clone());
        Arc::new(Self {
            bus,
            store: Arc::new(IngestionStore::new(pool_capacity)),
            stft: Arc::new(StftWorkerPool::new()),
            ring: Arc::new(DistributionRing::new(ring_capacity)),
            metrics,
            last_bpm: Mutex::new(None),
            last_track_meta: Mutex::new(HashMap::new()),
            track_meta: Mutex::new(HashMap::new()),
        })
    }

    fn run_worker(&self) {
        loop {
            let Some((datum, storage_id)) = self.store.wait_for_datum() else {
                if self.store.has_stopped() {
                    return;
                }
                continue;
            };
            self.handle_datum(datum);
            self.store.release(storage_id);
        }
    }

    fn handle_datum(&self, datum: AudioDatum) {
        match datum {
            AudioDatum::AudioSegment {
                track,
                channel,
                sample_rate,
                start_sample,
                samples,
            } => self.handle_audio_segment(track, channel, sample_rate, start_sample, samples),
            AudioDatum::SegmentNoOp { .. } => {}
            AudioDatum::DawInfo {
                bpm,
                ts_num,
                ts_den,
                looping: _,
                loop_start_qn: _,
                loop_end_qn: _,
            } => self.handle_daw_info(bpm, ts_num, ts_den),
            AudioDatum::TrackInfo { id, name, r, g, b, a } => self.handle_track_info(id, name, r, g, b, a),
        }
    }

    fn handle_audio_segment(
        &self,
        track: u64,
        channel: u32,
        sample_rate: u32,
        start_sample: i64,
        samples: Vec<f32>,
    ) {
        let sent_time = now_unix_ms();
        let waitgroup = self.metrics.acquire_waitgroup(sent_time);
        waitgroup.add();

        let num_samples = samples.len();
        let fft_data = self.stft.perform_fft(&samples);
        let num_ffts = fft_data.len() / num_bins_per_fft();

        let meta = self
            .track_meta
            .lock()
            .unwrap()
            .get(&track)
            .cloned()
            .unwrap_or_default();

        let frame = WireFrame {
            track_identifier: track,
            track_name: meta.name,
            track_color: meta.color,
            total_no_channels: 1,
            channel_index: channel,
            sample_rate,
            segment_start_sample: start_sample,
            segment_sample_length: num_samples as u32,
            no_ffts: num_ffts as u32,
            fft_data,
            daw_bpm: 0.0,
            daw_time_signature_numerator: 0,
            sent_time_unix_ms: sent_time,
        };
        self.ring.write(frame);

        self.bus.broadcast(Task::silent(TaskPayload::NewFftData(
            kfx_bus::NewFftDataTask {
                track_identifier: track,
                channel_index: channel,
                storage_identifier: 0,
            },
        )));

        waitgroup.record_completion();
    }

    fn handle_daw_info(&self, bpm: u32, ts_num: u32, ts_den: u32) {
        let mut last = self.last_bpm.lock().unwrap();
        let (old_bpm, old_num, old_den) = last.unwrap_or((bpm, ts_num, ts_den));
        *last = Some((bpm, ts_num, ts_den));
        drop(last);

        if old_bpm != bpm {
            self.bus.broadcast(Task::silent(TaskPayload::BpmUpdate(BpmUpdateTask {
                track_identifier: 0,
                old_bpm,
                new_bpm: bpm,
            })));
        }
        if old_num != ts_num || old_den != ts_den {
            self.bus.broadcast(Task::silent(TaskPayload::TimeSignatureUpdate(
                TimeSignatureUpdateTask {
                    track_identifier: 0,
                    old_numerator: old_num,
                    old_denominator: old_den,
                    new_numerator: ts_num,
                    new_denominator: ts_den,
                },
            )));
        }
    }

    fn handle_track_info(&self, id: u64, name: String, r: u8, g: u8, b: u8, a: u8) {
        let color = u32::from_be_bytes([r, g, b, a]);
        let new_meta = TrackMeta { name: name.clone(), color };
        self.track_meta.lock().unwrap().insert(id, new_meta.clone());

        let mut last = self.last_track_meta.lock().unwrap();
        let old_meta = last.get(&id).cloned().unwrap_or_else(|| new_meta.clone());
        last.insert(id, new_meta.clone());
        drop(last);

        self.bus.broadcast(Task::silent(TaskPayload::TrackInfoUpdate(TrackInfoUpdateTask {
            track_identifier: id,
            old_name: old_meta.name,
            old_color: old_meta.color,
            new_name: new_meta.name,
            new_color: new_meta.color,
        })));
    }
}

/// Push a few seconds of synthetic audio through a forwarder and a
/// loopback transport, then feed the recorded segments into the station
/// the way a real RPC handler would.
fn run_loopback_demo(station: &Arc<Station>) {
    use kfx_core::BLOCK_SIZE;

    let transport = Arc::new(LoopbackTransport::new());
    let forwarder = CoalescingForwarder::new(transport.clone());

    for i in 0..8 {
        let (index, block) = forwarder
            .get_free_block_slot()
            .expect("block pool exhausted in loopback demo");
        let samples: Vec<f32> = (0..BLOCK_SIZE)
            .map(|n| ((n as f32 + (i * BLOCK_SIZE) as f32) * 0.01).sin() * 0.5)
            .collect();
        block.fill(
            1,
            "kick",
            0x112233FF,
            48000,
            (i * BLOCK_SIZE) as i64,
            &[&samples],
            120,
            4,
            4,
            false,
            true,
        );
        forwarder.forward_block(index);
    }
    forwarder.shutdown();

    let segments = transport.received_segments();
    log::info!("loopback demo: forwarder produced {} segments", segments.len());
    for segment in &segments {
        if let Err(err) = station.store.parse(segment) {
            log::warn!("failed to parse loopback segment: {err}");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new().filter_level(log_level).init();

    log::info!(
        "starting kfx-station (listen_port={}, ring_capacity={}, pool_capacity={})",
        cli.listen_port,
        cli.ring_capacity,
        cli.pool_capacity
    );

    let bus = Arc::new(TaskBus::new());
    let station = Station::new(cli.pool_capacity, cli.ring_capacity, bus.clone());

    let mut workers = Vec::with_capacity(NUM_INGESTION_WORKERS);
    for _ in 0..NUM_INGESTION_WORKERS {
        let station = station.clone();
        workers.push(std::thread::spawn(move || station.run_worker()));
    }

    if cli.loopback {
        run_loopback_demo(&station);
        // Give the workers a moment to drain, then stop the pipeline.
        std::thread::sleep(std::time::Duration::from_millis(500));
        station.store.stop();
        for worker in workers {
            let _ = worker.join();
        }
        log::info!(
            "loopback demo complete: ring last_offset={}",
            station.ring.last_offset()
        );
        bus.shutdown_async();
        return Ok(());
    }

    // Without `--loopback`, the RPC framing that would feed real segments
    // into the store is an explicit non-goal; run until stdin closes so
    // the process still demonstrates its worker and dispatch threads.
    log::info!("no transport wired (RPC framing is a non-goal); press Ctrl-D to stop");
    let mut line = String::new();
    while std::io::stdin().read_line(&mut line).unwrap_or(0) > 0 {
        line.clear();
    }

    station.store.stop();
    for worker in workers {
        let _ = worker.join();
    }
    bus.shutdown_async();
    Ok(())
}
