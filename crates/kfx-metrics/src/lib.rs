//! Processing-time wait-groups (spec §4.9, C9). Grounded in
//! `StationApp/Audio/ProcessingTimer{,Waitgroup}.cpp`: a pool of
//! reusable wait-groups, one per in-flight payload, each counting down
//! worker completions before reporting elapsed time to a parent that
//! keeps a rolling average and broadcasts it as a task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use kfx_bus::{ProcessingTimeUpdateTask, Task, TaskBus, TaskPayload};

const DEFAULT_PREALLOCATED_WAITGROUPS: usize = 32;
const AVERAGING_WINDOW: usize = 32;

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct WaitgroupState {
    counter: usize,
    expected: usize,
    sent_time_unix_ms: i64,
}

/// Tracks completions for one outbound payload's downstream processing.
/// Reusable: [`ProcessingTimer::acquire_waitgroup`] calls `reset` before
/// handing it back out.
pub struct ProcessingTimerWaitgroup {
    identifier: usize,
    parent: Mutex<Option<Weak<ProcessingTimer>>>,
    state: Mutex<WaitgroupState>,
}

impl ProcessingTimerWaitgroup {
    fn new(parent: Weak<ProcessingTimer>, identifier: usize) -> Self {
        Self {
            identifier,
            parent: Mutex::new(Some(parent)),
            state: Mutex::new(WaitgroupState {
                counter: 0,
                expected: 0,
                sent_time_unix_ms: 0,
            }),
        }
    }

    fn reset(&self, payload_sent_time_unix_ms: i64) {
        let mut state = self.state.lock();
        state.counter = 0;
        state.expected = 0;
        state.sent_time_unix_ms = payload_sent_time_unix_ms;
    }

    /// Register one more completion this wait-group must see.
    pub fn add(&self) {
        self.state.lock().expected += 1;
    }

    /// Called by a worker thread when it finishes its share of the work.
    /// Reports to the parent timer once every registered completion has
    /// arrived.
    pub fn record_completion(&self) {
        let elapsed_ms = {
            let mut state = self.state.lock();
            state.counter += 1;
            match state.counter.cmp(&state.expected) {
                std::cmp::Ordering::Less => None,
                std::cmp::Ordering::Equal => Some(now_unix_ms() - state.sent_time_unix_ms),
                std::cmp::Ordering::Greater => {
                    log::error!("processing timer waitgroup {} saw more completions than expected", self.identifier);
                    None
                }
            }
        };
        let Some(elapsed_ms) = elapsed_ms else { return };
        if let Some(parent) = self.parent.lock().as_ref().and_then(Weak::upgrade) {
            parent.record_completion(self.identifier, elapsed_ms);
        }
    }

    /// Prevents a dangling callback into a parent that is being torn
    /// down; idempotent.
    pub fn deactivate(&self) {
        *self.parent.lock() = None;
    }
}

/// Owns a pool of [`ProcessingTimerWaitgroup`]s and accumulates a rolling
/// average latency, broadcast as a [`ProcessingTimeUpdateTask`] every
/// [`AVERAGING_WINDOW`] samples.
pub struct ProcessingTimer {
    self_weak: Weak<ProcessingTimer>,
    bus: Arc<TaskBus>,
    waitgroups: Mutex<Vec<Arc<ProcessingTimerWaitgroup>>>,
    idle: Mutex<VecDeque<usize>>,
    samples: Mutex<Vec<i64>>,
    sample_count: AtomicUsize,
}

impl ProcessingTimer {
    pub fn new(bus: Arc<TaskBus>) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| {
            let mut waitgroups = Vec::with_capacity(DEFAULT_PREALLOCATED_WAITGROUPS);
            let mut idle = VecDeque::with_capacity(DEFAULT_PREALLOCATED_WAITGROUPS);
            for i in 0..DEFAULT_PREALLOCATED_WAITGROUPS {
                waitgroups.push(Arc::new(ProcessingTimerWaitgroup::new(self_weak.clone(), i)));
                idle.push_back(i);
            }
            Self {
                self_weak: self_weak.clone(),
                bus,
                waitgroups: Mutex::new(waitgroups),
                idle: Mutex::new(idle),
                samples: Mutex::new(Vec::with_capacity(AVERAGING_WINDOW)),
                sample_count: AtomicUsize::new(0),
            }
        })
    }

    /// Hand out a wait-group reset against `payload_sent_time_unix_ms`,
    /// growing the pool if every existing wait-group is busy.
    pub fn acquire_waitgroup(&self, payload_sent_time_unix_ms: i64) -> Arc<ProcessingTimerWaitgroup> {
        let mut idle = self.idle.lock();
        let index = match idle.pop_front() {
            Some(index) => index,
            None => {
                let mut waitgroups = self.waitgroups.lock();
                let index = waitgroups.len();
                waitgroups.push(Arc::new(ProcessingTimerWaitgroup::new(self.self_weak.clone(), index)));
                index
            }
        };
        let waitgroup = self.waitgroups.lock()[index].clone();
        waitgroup.reset(payload_sent_time_unix_ms);
        waitgroup
    }

    fn record_completion(&self, identifier: usize, processing_time_ms: i64) {
        self.idle.lock().push_back(identifier);

        let average = {
            let mut samples = self.samples.lock();
            samples.push(processing_time_ms);
            if samples.len() < AVERAGING_WINDOW {
                None
            } else {
                let sum: i64 = samples.drain(..).sum();
                Some(sum as f64 / AVERAGING_WINDOW as f64)
            }
        };
        if let Some(average_processing_time_ms) = average {
            self.sample_count.fetch_add(1, Ordering::Relaxed);
            self.bus.broadcast(Task::silent(TaskPayload::ProcessingTimeUpdate(
                ProcessingTimeUpdateTask { average_processing_time_ms },
            )));
        }
    }

    /// Number of rolling-average reports broadcast so far.
    pub fn reports_sent(&self) -> usize {
        self.sample_count.load(Ordering::Relaxed)
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        for waitgroup in self.waitgroups.lock().iter() {
            waitgroup.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn reports_rolling_average_every_32_samples() {
        let bus = Arc::new(TaskBus::new());
        let (tx, rx) = unbounded();
        bus.register(move |task| {
            if let TaskPayload::ProcessingTimeUpdate(update) = &task.payload {
                let _ = tx.send(*update);
            }
            kfx_bus::ListenerResult::Continue
        });

        let timer = ProcessingTimer::new(bus.clone());
        for _ in 0..AVERAGING_WINDOW {
            let wg = timer.acquire_waitgroup(now_unix_ms() - 5);
            wg.add();
            wg.add();
            wg.record_completion();
            wg.record_completion();
        }

        let update = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("rolling average report should arrive");
        assert!(update.average_processing_time_ms >= 0.0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(timer.reports_sent(), 1);
    }

    #[test]
    fn deactivate_prevents_report_after_parent_drop() {
        let bus = Arc::new(TaskBus::new());
        let timer = ProcessingTimer::new(bus);
        let wg = timer.acquire_waitgroup(now_unix_ms());
        wg.add();
        drop(timer);
        // Parent is gone; recording a completion must not panic or reach it.
        wg.record_completion();
    }

    #[test]
    fn extra_completion_beyond_expected_is_logged_not_fatal() {
        let bus = Arc::new(TaskBus::new());
        let timer = ProcessingTimer::new(bus);
        let wg = timer.acquire_waitgroup(now_unix_ms());
        wg.add();
        wg.record_completion();
        wg.record_completion();
    }
}
