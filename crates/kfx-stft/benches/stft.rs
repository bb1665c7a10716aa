//! Batched STFT worker pool throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kfx_stft::StftWorkerPool;

fn bench_perform_fft(c: &mut Criterion) {
    let pool = StftWorkerPool::new();
    let signal: Vec<f32> = (0..48_000).map(|i| (i as f32 * 0.01).sin()).collect();

    c.bench_function("stft_perform_fft_1s_48k", |b| {
        b.iter(|| {
            let result = pool.perform_fft(black_box(&signal));
            pool.reuse_result_vector(result);
        })
    });
}

fn bench_perform_fft_short(c: &mut Criterion) {
    let pool = StftWorkerPool::new();
    let signal: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();

    c.bench_function("stft_perform_fft_one_block", |b| {
        b.iter(|| {
            let result = pool.perform_fft(black_box(&signal));
            pool.reuse_result_vector(result);
        })
    });
}

criterion_group!(benches, bench_perform_fft, bench_perform_fft_short);
criterion_main!(benches);
