//! STFT worker pool (spec §4.6, C6). Grounded in
//! `HeadlessAudioBroadcast/FftProcessor.cpp`: a pool of
//! `hardware_concurrency` workers draining a shared job queue, a caller
//! that submits work in batches of up to `BATCH` guarded by a wait-group,
//! and an LIFO cache of free result vectors to avoid reallocating on
//! every call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

use kfx_core::{num_bins_per_fft, num_ffts_for_samples, BATCH, MIN_DB, OVERLAP, WIN, ZERO_PAD};

use crate::window::hann_table;

/// Hann windows average 0.5 in amplitude; scale back up so a sinusoid's
/// peak bin reads the same magnitude a rectangular window would report.
const HANN_AMPLITUDE_CORRECTION: f32 = 2.0;

const FFT_SIZE: usize = WIN * ZERO_PAD;

struct WaitGroup {
    remaining: AtomicUsize,
    mutex: Mutex<()>,
    cv: Condvar,
}

impl WaitGroup {
    fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            mutex: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn done(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.mutex.lock();
            self.cv.notify_all();
        }
    }

    fn wait(&self) {
        let mut guard = self.mutex.lock();
        while self.remaining.load(Ordering::Acquire) != 0 {
            self.cv.wait(&mut guard);
        }
    }
}

struct Job {
    input: Arc<Vec<f32>>,
    position: usize,
    length: usize,
    output: Arc<Mutex<Vec<f32>>>,
    num_bins: usize,
    wait_group: Arc<WaitGroup>,
}

/// Parallel fan-out/fan-in engine performing one STFT per submitted job.
pub struct StftWorkerPool {
    queue: Arc<Mutex<VecDeque<Job>>>,
    queue_cv: Arc<Condvar>,
    exiting: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    result_cache: Mutex<Vec<Vec<f32>>>,
}

impl StftWorkerPool {
    pub fn new() -> Self {
        Self::with_worker_count(num_cpus::get().max(1))
    }

    pub fn with_worker_count(worker_count: usize) -> Self {
        let queue: Arc<Mutex<VecDeque<Job>>> = Arc::new(Mutex::new(VecDeque::new()));
        let queue_cv = Arc::new(Condvar::new());
        let exiting = Arc::new(AtomicBool::new(false));
        let hann = Arc::new(hann_table());

        let mut planner = RealFftPlanner::<f32>::new();
        let forward: Arc<dyn RealToComplex<f32>> = planner.plan_fft_forward(FFT_SIZE);

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let queue = queue.clone();
            let queue_cv = queue_cv.clone();
            let exiting = exiting.clone();
            let hann = hann.clone();
            let forward = forward.clone();
            workers.push(thread::spawn(move || worker_loop(queue, queue_cv, exiting, hann, forward)));
        }

        Self {
            queue,
            queue_cv,
            exiting,
            workers: Mutex::new(workers),
            result_cache: Mutex::new(Vec::new()),
        }
    }

    fn acquire_result_vector(&self, len: usize) -> Vec<f32> {
        let mut cache = self.result_cache.lock();
        match cache.pop() {
            Some(mut v) => {
                v.clear();
                v.resize(len, MIN_DB);
                v
            }
            None => vec![MIN_DB; len],
        }
    }

    /// Recycle a result vector returned from a prior [`Self::perform_fft`]
    /// call into the cache (spec's "FftResultVectorReuseTask").
    pub fn reuse_result_vector(&self, v: Vec<f32>) {
        self.result_cache.lock().push(v);
    }

    /// Run one STFT per overlapping window of `signal`, returning
    /// `num_ffts * num_bins_per_fft` dB values (spec §3, §4.6).
    pub fn perform_fft(&self, signal: &[f32]) -> Vec<f32> {
        let num_ffts = num_ffts_for_samples(signal.len());
        let num_bins = num_bins_per_fft();
        let output = Arc::new(Mutex::new(self.acquire_result_vector(num_ffts * num_bins)));
        let input = Arc::new(signal.to_vec());

        let hop = WIN / OVERLAP;
        let mut position = 0;
        while position < num_ffts {
            let batch_end = (position + BATCH).min(num_ffts);
            let wait_group = Arc::new(WaitGroup::new(batch_end - position));
            {
                let mut queue = self.queue.lock();
                for p in position..batch_end {
                    let start = p * hop;
                    let length = if start >= input.len() {
                        0
                    } else {
                        (input.len() - start).min(WIN)
                    };
                    queue.push_back(Job {
                        input: input.clone(),
                        position: p,
                        length,
                        output: output.clone(),
                        num_bins,
                        wait_group: wait_group.clone(),
                    });
                }
            }
            self.queue_cv.notify_all();
            wait_group.wait();
            position = batch_end;
        }

        Arc::try_unwrap(output)
            .map(|m| m.into_inner())
            .unwrap_or_else(|arc| arc.lock().clone())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Drop for StftWorkerPool {
    fn drop(&mut self) {
        self.exiting.store(true, Ordering::Release);
        self.queue_cv.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Default for StftWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(
    queue: Arc<Mutex<VecDeque<Job>>>,
    queue_cv: Arc<Condvar>,
    exiting: Arc<AtomicBool>,
    hann: Arc<Vec<f32>>,
    forward: Arc<dyn RealToComplex<f32>>,
) {
    let mut scratch = forward.make_scratch_vec();
    let mut spectrum = forward.make_output_vec();

    loop {
        let job = {
            let mut guard = queue.lock();
            loop {
                if let Some(job) = guard.pop_front() {
                    break Some(job);
                }
                if exiting.load(Ordering::Acquire) {
                    break None;
                }
                queue_cv.wait(&mut guard);
            }
        };
        let Some(job) = job else { break };
        run_job(job, &hann, forward.as_ref(), &mut scratch, &mut spectrum);
    }
}

fn run_job(
    job: Job,
    hann: &[f32],
    forward: &dyn RealToComplex<f32>,
    scratch: &mut [Complex32],
    spectrum: &mut [Complex32],
) {
    let mut windowed = vec![0.0f32; FFT_SIZE];
    if job.length > 0 {
        let start = job.position * (WIN / OVERLAP);
        let source = &job.input[start..start + job.length];
        for i in 0..job.length {
            windowed[i] = source[i] * hann[i];
        }
    }

    let bins_out = if job.length == 0 {
        vec![MIN_DB; job.num_bins]
    } else {
        forward
            .process_with_scratch(&mut windowed, spectrum, scratch)
            .expect("fft plan mismatch is a permanent internal failure");
        spectrum[..job.num_bins]
            .iter()
            .map(|c| magnitude_to_db(c.norm_sqr()))
            .collect()
    };

    let mut output = job.output.lock();
    let offset = job.position * job.num_bins;
    output[offset..offset + job.num_bins].copy_from_slice(&bins_out);
    drop(output);
    job.wait_group.done();
}

fn magnitude_to_db(magnitude_sq: f32) -> f32 {
    let normalized = magnitude_sq / (WIN as f32 * WIN as f32);
    let corrected = normalized * HANN_AMPLITUDE_CORRECTION * HANN_AMPLITUDE_CORRECTION;
    let db = 10.0 * corrected.max(1e-12).log10();
    db.clamp(MIN_DB, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Property 6 / Scenario S6 — frame count for N=4096 samples.
    #[test]
    fn s6_frame_count_and_db_clamp() {
        let pool = StftWorkerPool::with_worker_count(2);
        let signal = vec![0.3f32; 4096];
        let result = pool.perform_fft(&signal);
        let expected_bins = num_bins_per_fft() * num_ffts_for_samples(4096);
        assert_eq!(result.len(), expected_bins);
        assert_eq!(num_ffts_for_samples(4096), 5);
        for &db in &result {
            assert!(db >= MIN_DB && db <= 0.0);
        }
    }

    /// Property 7 — dB clamping holds for silence too.
    #[test]
    fn silence_is_clamped_to_min_db() {
        let pool = StftWorkerPool::with_worker_count(2);
        let signal = vec![0.0f32; WIN];
        let result = pool.perform_fft(&signal);
        for &db in &result {
            assert_relative_eq!(db, MIN_DB, epsilon = 1e-3);
        }
    }

    #[test]
    fn zero_length_job_is_a_no_op() {
        let pool = StftWorkerPool::with_worker_count(1);
        let result = pool.perform_fft(&[]);
        assert_eq!(result.len(), num_bins_per_fft());
        assert!(result.iter().all(|&db| db == MIN_DB));
    }
}
