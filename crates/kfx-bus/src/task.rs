//! Typed tasks carried on the bus (spec §3, §4.3, §9).
//!
//! The original models tasks as a polymorphic class hierarchy with
//! dynamic down-casts at consumer sites; here they are a tagged union a
//! listener matches on directly, never queries for a type.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_GROUP: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh task-group id, ties several tasks into one undo step.
pub fn new_task_group_id() -> u64 {
    NEXT_TASK_GROUP.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BpmUpdateTask {
    pub track_identifier: u64,
    pub old_bpm: u32,
    pub new_bpm: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSignatureUpdateTask {
    pub track_identifier: u64,
    pub old_numerator: u32,
    pub old_denominator: u32,
    pub new_numerator: u32,
    pub new_denominator: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfoUpdateTask {
    pub track_identifier: u64,
    pub old_name: String,
    pub old_color: u32,
    pub new_name: String,
    pub new_color: u32,
}

/// Carries one completed STFT frame to subscribers. Not reversible: it
/// never goes in history (`SilentTask` in the original).
#[derive(Debug, Clone)]
pub struct NewFftDataTask {
    pub track_identifier: u64,
    pub channel_index: u32,
    pub storage_identifier: usize,
}

/// Signals that a frame's backing result vector may be recycled into the
/// STFT pool's LIFO cache. Also silent.
#[derive(Debug, Clone, PartialEq)]
pub struct FftResultVectorReuseTask {
    pub storage_identifier: usize,
}

/// C9's rolling-average latency report. Silent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingTimeUpdateTask {
    pub average_processing_time_ms: f64,
}

/// Test/demo task carrying arbitrary forward/reverse state, grounded the
/// same way the original's tasking-manager test suite exercises undo
/// without needing a "real" domain task.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericTask {
    pub label: String,
    pub forward_value: i64,
    pub reverse_value: i64,
}

#[derive(Debug, Clone)]
pub enum TaskPayload {
    BpmUpdate(BpmUpdateTask),
    TimeSignatureUpdate(TimeSignatureUpdateTask),
    TrackInfoUpdate(TrackInfoUpdateTask),
    NewFftData(NewFftDataTask),
    FftResultVectorReuse(FftResultVectorReuseTask),
    ProcessingTimeUpdate(ProcessingTimeUpdateTask),
    ClearHistory,
    Generic(GenericTask),
}

/// One event flowing through the bus.
#[derive(Debug, Clone)]
pub struct Task {
    pub payload: TaskPayload,
    pub task_group: Option<u64>,
    pub history_eligible: bool,
    pub is_reversion: bool,
    pub completed: bool,
    pub failed: bool,
}

impl Task {
    pub fn new(payload: TaskPayload) -> Self {
        let history_eligible = !matches!(
            payload,
            TaskPayload::NewFftData(_)
                | TaskPayload::FftResultVectorReuse(_)
                | TaskPayload::ProcessingTimeUpdate(_)
        );
        Self {
            payload,
            task_group: None,
            history_eligible,
            is_reversion: false,
            completed: false,
            failed: false,
        }
    }

    /// A task that is never recorded in history, regardless of its payload.
    pub fn silent(payload: TaskPayload) -> Self {
        let mut task = Self::new(payload);
        task.history_eligible = false;
        task
    }

    pub fn with_task_group(mut self, group: u64) -> Self {
        self.task_group = Some(group);
        self
    }

    /// Tasks whose opposite can undo them. Most bus traffic is a state
    /// report with no user-undoable inverse; only tasks that carry an
    /// old/new pair are reversible.
    pub fn opposite(&self) -> Vec<Task> {
        let reversed = match &self.payload {
            TaskPayload::BpmUpdate(t) => TaskPayload::BpmUpdate(BpmUpdateTask {
                track_identifier: t.track_identifier,
                old_bpm: t.new_bpm,
                new_bpm: t.old_bpm,
            }),
            TaskPayload::TimeSignatureUpdate(t) => {
                TaskPayload::TimeSignatureUpdate(TimeSignatureUpdateTask {
                    track_identifier: t.track_identifier,
                    old_numerator: t.new_numerator,
                    old_denominator: t.new_denominator,
                    new_numerator: t.old_numerator,
                    new_denominator: t.old_denominator,
                })
            }
            TaskPayload::TrackInfoUpdate(t) => TaskPayload::TrackInfoUpdate(TrackInfoUpdateTask {
                track_identifier: t.track_identifier,
                old_name: t.new_name.clone(),
                old_color: t.new_color,
                new_name: t.old_name.clone(),
                new_color: t.old_color,
            }),
            TaskPayload::Generic(t) => TaskPayload::Generic(GenericTask {
                label: t.label.clone(),
                forward_value: t.reverse_value,
                reverse_value: t.forward_value,
            }),
            // Silent/state-report tasks have no meaningful inverse.
            other => other.clone(),
        };
        let mut reversion = Task::new(reversed);
        reversion.task_group = self.task_group;
        reversion.is_reversion = true;
        reversion.history_eligible = false;
        vec![reversion]
    }
}
