//! Ring buffer write/read throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kfx_ring::DistributionRing;
use kfx_transport::WireFrame;

fn frame(segment_start_sample: i64) -> WireFrame {
    WireFrame {
        track_identifier: 1,
        track_name: "Kick".into(),
        track_color: 0,
        total_no_channels: 1,
        channel_index: 0,
        sample_rate: 48000,
        segment_start_sample,
        segment_sample_length: 2048,
        no_ffts: 4,
        fft_data: vec![-64.0; 1025],
        daw_bpm: 120.0,
        daw_time_signature_numerator: 4,
        sent_time_unix_ms: 0,
    }
}

fn bench_write(c: &mut Criterion) {
    let ring = DistributionRing::new(512);
    let mut i = 0i64;
    c.bench_function("ring_write_512", |b| {
        b.iter(|| {
            ring.write(black_box(frame(i)));
            i += 1;
        })
    });
}

fn bench_catch_up_read(c: &mut Criterion) {
    let ring = DistributionRing::new(512);
    for i in 0..512 {
        ring.write(frame(i));
    }
    c.bench_function("ring_catch_up_read_512", |b| {
        b.iter(|| {
            let resp = ring.read(black_box(0), black_box(0));
            ring.release(resp);
        })
    });
}

criterion_group!(benches, bench_write, bench_catch_up_read);
criterion_main!(benches);
