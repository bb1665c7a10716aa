//! Background dispatch thread and undo/redo history (spec §4.3, C3).
//!
//! Grounded in `TaskingManager`: a single dispatch thread drains a queue
//! and fans a task out to every registered listener in registration
//! order; undo/redo walk a fixed-size history ring and a cancelled-task
//! stack.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::task::{Task, TaskPayload};

/// Number of completed, history-eligible tasks retained for undo.
pub const HISTORY_CAPACITY: usize = 4096;

/// Returned by a listener to control fan-out for the current task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerResult {
    Continue,
    Stop,
}

type Listener = dyn Fn(&Task) -> ListenerResult + Send + Sync;

enum BusMessage {
    Dispatch(Task),
    Undo,
    Redo,
    Shutdown,
}

struct History {
    entries: Vec<Task>,
    cancelled: Vec<Task>,
}

impl History {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(HISTORY_CAPACITY),
            cancelled: Vec::new(),
        }
    }

    fn record(&mut self, task: Task) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.remove(0);
        }
        self.entries.push(task);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.cancelled.clear();
    }
}

/// Process-wide typed publish/subscribe bus with a background dispatch
/// thread and an undo/redo history.
pub struct TaskBus {
    sender: Sender<BusMessage>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
    dispatch_thread_id: Arc<Mutex<Option<ThreadId>>>,
    listeners: Arc<Mutex<Vec<(u64, Arc<Listener>)>>>,
    next_listener_id: AtomicU64,
    shutdown_requested: Arc<AtomicBool>,
}

impl TaskBus {
    pub fn new() -> Self {
        let (sender, receiver): (Sender<BusMessage>, Receiver<BusMessage>) = unbounded();
        let listeners: Arc<Mutex<Vec<(u64, Arc<Listener>)>>> = Arc::new(Mutex::new(Vec::new()));
        let dispatch_thread_id = Arc::new(Mutex::new(None));
        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let history = Arc::new(Mutex::new(History::new()));

        let thread_listeners = listeners.clone();
        let thread_history = history.clone();
        let thread_id_slot = dispatch_thread_id.clone();

        let handle = thread::spawn(move || {
            *thread_id_slot.lock() = Some(thread::current().id());
            dispatch_loop(receiver, thread_listeners, thread_history);
        });

        Self {
            sender,
            dispatch_thread: Mutex::new(Some(handle)),
            dispatch_thread_id,
            listeners,
            next_listener_id: AtomicU64::new(1),
            shutdown_requested,
        }
    }

    /// Register a listener, called in registration order for every
    /// dispatched task. Safe from any thread.
    pub fn register<F>(&self, listener: F) -> u64
    where
        F: Fn(&Task) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unregister(&self, id: u64) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    /// Non-blocking enqueue; wakes the dispatcher.
    pub fn broadcast(&self, task: Task) {
        let _ = self.sender.send(BusMessage::Dispatch(task));
    }

    pub fn undo(&self) {
        let _ = self.sender.send(BusMessage::Undo);
    }

    pub fn redo(&self) {
        let _ = self.sender.send(BusMessage::Redo);
    }

    /// Flags the dispatcher to exit after draining what's already queued.
    /// Does not join.
    pub fn shutdown_async(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        let _ = self.sender.send(BusMessage::Shutdown);
    }

    pub fn shutdown_was_called(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn is_background_thread_running(&self) -> bool {
        match self.dispatch_thread.lock().as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// True only when called from inside a listener running on the
    /// dispatch thread.
    pub fn is_dispatch_thread(&self) -> bool {
        *self.dispatch_thread_id.lock() == Some(thread::current().id())
    }

    /// Fan a task out synchronously, re-entering the dispatch loop instead
    /// of going through the queue. Callable only from inside a listener
    /// already running on the dispatch thread; panics otherwise, since
    /// calling it from any other thread would run listeners concurrently
    /// with the background dispatch loop.
    pub fn broadcast_nested_now(&self, task: &Task) {
        assert!(
            self.is_dispatch_thread(),
            "broadcast_nested_now called off the dispatch thread"
        );
        fan_out(task, &self.listeners);
    }

    /// For tests: block until the dispatch thread has exited after
    /// `shutdown_async`.
    #[cfg(test)]
    pub fn join_for_test(&self) {
        if let Some(handle) = self.dispatch_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for TaskBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan a task out synchronously to every registered listener, in
/// registration order, honouring an early "stop". A panicking listener
/// is caught, logged, and treated as "did not handle".
fn fan_out(task: &Task, listeners: &Mutex<Vec<(u64, Arc<Listener>)>>) {
    // Snapshot the listener Arcs under the lock, then call them after
    // releasing it — a listener may itself register/unregister, and an
    // Arc clone keeps the closure alive even if it is concurrently
    // removed from the registry mid fan-out.
    let snapshot: Vec<Arc<Listener>> = listeners.lock().iter().map(|(_, f)| f.clone()).collect();
    for listener in snapshot {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(task)));
        match result {
            Ok(ListenerResult::Stop) => break,
            Ok(ListenerResult::Continue) => {}
            Err(_) => {
                log::error!("task listener panicked, treating as unhandled");
            }
        }
    }
}

fn dispatch_loop(
    receiver: Receiver<BusMessage>,
    listeners: Arc<Mutex<Vec<(u64, Arc<Listener>)>>>,
    history: Arc<Mutex<History>>,
) {
    for message in receiver.iter() {
        match message {
            BusMessage::Dispatch(mut task) => {
                fan_out(&task, &listeners);
                task.completed = true;

                if let TaskPayload::ClearHistory = task.payload {
                    history.lock().clear();
                    continue;
                }

                if task.history_eligible && !task.is_reversion {
                    history.lock().cancelled.clear();
                }
                if task.history_eligible {
                    history.lock().record(task);
                }
            }
            BusMessage::Undo => undo_locked(&listeners, &history),
            BusMessage::Redo => redo_locked(&listeners, &history),
            BusMessage::Shutdown => break,
        }
    }
}

/// Pop the most recent history entry (and every entry sharing its
/// task-group id) and broadcast each one's opposite, reentrant-style,
/// from the dispatch thread.
fn undo_locked(listeners: &Arc<Mutex<Vec<(u64, Arc<Listener>)>>>, history: &Arc<Mutex<History>>) {
    let popped = {
        let mut guard = history.lock();
        if guard.entries.is_empty() {
            return;
        }
        let group = guard.entries.last().unwrap().task_group;
        let mut batch = Vec::new();
        loop {
            let continues = match guard.entries.last() {
                Some(candidate) => batch.is_empty() || (group.is_some() && candidate.task_group == group),
                None => false,
            };
            if !continues {
                break;
            }
            batch.push(guard.entries.pop().unwrap());
        }
        batch
    };

    for task in &popped {
        for reversion in task.opposite() {
            fan_out(&reversion, listeners);
        }
    }
    history.lock().cancelled.extend(popped);
}

/// Restore the most recently cancelled batch by re-broadcasting the
/// original tasks in their original order.
fn redo_locked(listeners: &Arc<Mutex<Vec<(u64, Arc<Listener>)>>>, history: &Arc<Mutex<History>>) {
    let restored = {
        let mut guard = history.lock();
        if guard.cancelled.is_empty() {
            return;
        }
        let group = guard.cancelled.last().unwrap().task_group;
        let mut batch = Vec::new();
        loop {
            let continues = match guard.cancelled.last() {
                Some(candidate) => batch.is_empty() || (group.is_some() && candidate.task_group == group),
                None => false,
            };
            if !continues {
                break;
            }
            batch.push(guard.cancelled.pop().unwrap());
        }
        // Cancelled is a stack with the oldest member of the undone
        // group on top (it was pushed last by `undo_locked`), so popping
        // it already yields chronological order.
        batch
    };

    for task in &restored {
        fan_out(task, listeners);
    }
    let mut guard = history.lock();
    for task in restored {
        guard.record(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BpmUpdateTask, GenericTask};
    use std::sync::mpsc;
    use std::time::Duration;

    fn recv_timeout<T>(rx: &mpsc::Receiver<T>) -> T {
        rx.recv_timeout(Duration::from_secs(1))
            .expect("listener did not fire in time")
    }

    #[test]
    fn broadcast_reaches_registered_listener() {
        let bus = TaskBus::new();
        let (tx, rx) = mpsc::channel();
        bus.register(move |task| {
            let label = match &task.payload {
                TaskPayload::Generic(g) => g.label.clone(),
                _ => panic!("expected Generic payload"),
            };
            tx.send(label).unwrap();
            ListenerResult::Continue
        });
        bus.broadcast(Task::new(TaskPayload::Generic(GenericTask {
            label: "hello".into(),
            forward_value: 1,
            reverse_value: 0,
        })));
        assert_eq!(recv_timeout(&rx), "hello");
        bus.shutdown_async();
        bus.join_for_test();
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let bus = TaskBus::new();
        let (tx, rx) = mpsc::channel();
        for n in 0..3 {
            let tx = tx.clone();
            bus.register(move |_task| {
                tx.send(n).unwrap();
                ListenerResult::Continue
            });
        }
        bus.broadcast(Task::new(TaskPayload::Generic(GenericTask {
            label: "x".into(),
            forward_value: 0,
            reverse_value: 0,
        })));
        assert_eq!(recv_timeout(&rx), 0);
        assert_eq!(recv_timeout(&rx), 1);
        assert_eq!(recv_timeout(&rx), 2);
        bus.shutdown_async();
        bus.join_for_test();
    }

    #[test]
    fn stop_short_circuits_fan_out() {
        let bus = TaskBus::new();
        let (tx, rx) = mpsc::channel();
        bus.register(|_task| ListenerResult::Stop);
        let tx2 = tx.clone();
        bus.register(move |_task| {
            tx2.send(()).unwrap();
            ListenerResult::Continue
        });
        bus.broadcast(Task::new(TaskPayload::Generic(GenericTask {
            label: "x".into(),
            forward_value: 0,
            reverse_value: 0,
        })));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        bus.shutdown_async();
        bus.join_for_test();
    }

    /// Property 9 — task-group atomic undo.
    #[test]
    fn task_group_undo_and_redo_are_atomic() {
        let bus = TaskBus::new();
        let (tx, rx) = mpsc::channel();
        bus.register(move |task| {
            tx.send(task.clone()).unwrap();
            ListenerResult::Continue
        });

        let group = crate::task::new_task_group_id();
        bus.broadcast(
            Task::new(TaskPayload::BpmUpdate(BpmUpdateTask {
                track_identifier: 1,
                old_bpm: 100,
                new_bpm: 110,
            }))
            .with_task_group(group),
        );
        bus.broadcast(
            Task::new(TaskPayload::BpmUpdate(BpmUpdateTask {
                track_identifier: 1,
                old_bpm: 110,
                new_bpm: 120,
            }))
            .with_task_group(group),
        );
        let _ = recv_timeout(&rx);
        let _ = recv_timeout(&rx);

        bus.undo();
        let first_reversion = recv_timeout(&rx);
        let second_reversion = recv_timeout(&rx);
        assert!(first_reversion.is_reversion);
        assert!(second_reversion.is_reversion);

        bus.redo();
        let first_redo = recv_timeout(&rx);
        let second_redo = recv_timeout(&rx);
        assert!(!first_redo.is_reversion);
        assert!(!second_redo.is_reversion);

        bus.shutdown_async();
        bus.join_for_test();
    }

    #[test]
    fn shutdown_async_does_not_block_caller() {
        let bus = TaskBus::new();
        bus.shutdown_async();
        assert!(bus.shutdown_was_called());
    }

    #[test]
    fn nested_broadcast_fans_out_synchronously_from_dispatch_thread() {
        let bus = Arc::new(TaskBus::new());
        let (tx, rx) = mpsc::channel();
        let nested_bus = bus.clone();
        bus.register(move |task| {
            if let TaskPayload::Generic(g) = &task.payload {
                tx.send(g.label.clone()).unwrap();
                if g.label == "trigger" {
                    assert!(nested_bus.is_dispatch_thread());
                    nested_bus.broadcast_nested_now(&Task::new(TaskPayload::Generic(GenericTask {
                        label: "nested".into(),
                        forward_value: 0,
                        reverse_value: 0,
                    })));
                }
            }
            ListenerResult::Continue
        });

        bus.broadcast(Task::new(TaskPayload::Generic(GenericTask {
            label: "trigger".into(),
            forward_value: 0,
            reverse_value: 0,
        })));

        // The nested fan-out runs inline before the outer listener call
        // returns, so "nested" arrives before the queued broadcast's own
        // dispatch-loop iteration could have produced it.
        assert_eq!(recv_timeout(&rx), "trigger");
        assert_eq!(recv_timeout(&rx), "nested");

        bus.shutdown_async();
        bus.join_for_test();
    }

    #[test]
    #[should_panic(expected = "broadcast_nested_now called off the dispatch thread")]
    fn nested_broadcast_off_dispatch_thread_panics() {
        let bus = TaskBus::new();
        bus.broadcast_nested_now(&Task::new(TaskPayload::Generic(GenericTask {
            label: "x".into(),
            forward_value: 0,
            reverse_value: 0,
        })));
    }
}
