//! Clocks and single-shot timers used for throttled delivery.
//!
//! Two implementations are provided:
//! - [`ThreadScheduler`]: wall-clock timers run on a dedicated worker thread.
//! - [`ManualScheduler`]: a virtual clock that only moves when told to. Used by
//!   tests and by hosts that drive their own event loop.

use crate::types::Timestamp;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Work run when a timer expires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Clock plus single-shot timer primitive.
pub trait Scheduler: Send + Sync {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Timestamp;

    /// Run `task` once after `delay`. Dropping the handle does not cancel.
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Handle to a scheduled timer.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the timer. No-op if it already fired.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

// --- Thread Scheduler ---

enum TimerMsg {
    Schedule {
        id: u64,
        deadline: Instant,
        task: TimerTask,
    },
    Cancel {
        id: u64,
    },
}

/// Runs timers on a dedicated worker thread.
///
/// Timer tasks execute on the worker thread. The thread exits once every
/// handle to the scheduler is dropped.
pub struct ThreadScheduler {
    epoch: Instant,
    control_tx: Sender<TimerMsg>,
    next_id: Mutex<u64>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        let (control_tx, control_rx) = unbounded::<TimerMsg>();

        // Detached: a timer task may drop the last scheduler handle from the
        // worker itself, so joining here could deadlock.
        if let Err(err) = thread::Builder::new()
            .name("store-triggers-timer".to_string())
            .spawn(move || timer_loop(control_rx))
        {
            tracing::error!(%err, "failed to spawn timer worker; throttled triggers will not fire");
        }

        Self {
            epoch: Instant::now(),
            control_tx,
            next_id: Mutex::new(1),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Timestamp {
        let ms = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp(ms)
    }

    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        let msg = TimerMsg::Schedule {
            id,
            deadline: Instant::now() + delay,
            task,
        };
        if self.control_tx.send(msg).is_err() {
            tracing::warn!(timer = id, "timer worker is gone; dropping timer");
        }

        let control_tx = self.control_tx.clone();
        TimerHandle::new(move || {
            let _ = control_tx.send(TimerMsg::Cancel { id });
        })
    }
}

fn timer_loop(control_rx: Receiver<TimerMsg>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut tasks: HashMap<u64, TimerTask> = HashMap::new();

    loop {
        let msg = match deadlines.peek() {
            Some(Reverse((deadline, _))) => match control_rx.recv_deadline(*deadline) {
                Ok(msg) => Some(msg),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match control_rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        match msg {
            Some(TimerMsg::Schedule { id, deadline, task }) => {
                deadlines.push(Reverse((deadline, id)));
                tasks.insert(id, task);
            }
            Some(TimerMsg::Cancel { id }) => {
                // Heap entry is skipped lazily when it comes due.
                tasks.remove(&id);
            }
            None => {
                let now = Instant::now();
                while let Some(Reverse((deadline, id))) = deadlines.peek().copied() {
                    if deadline > now {
                        break;
                    }
                    deadlines.pop();
                    if let Some(task) = tasks.remove(&id) {
                        task();
                    }
                }
            }
        }
    }

    tracing::debug!(abandoned = tasks.len(), "timer worker exiting");
}

// --- Manual Scheduler ---

struct ManualTimer {
    id: u64,
    due: Timestamp,
    task: TimerTask,
}

#[derive(Default)]
struct ManualState {
    now: Timestamp,
    next_id: u64,
    timers: Vec<ManualTimer>,
}

/// Scheduler with a virtual clock.
///
/// Time only moves through [`advance`](ManualScheduler::advance); due timers
/// run on the calling thread, in due order.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward, firing every timer that comes due on the way.
    ///
    /// Timers scheduled by a firing task are honoured if they fall inside the
    /// window.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now.saturating_add(by);

        loop {
            let timer = {
                let mut state = self.state.lock();
                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let timer = state.timers.remove(index);
                        state.now = state.now.max(timer.due);
                        timer
                    }
                    None => {
                        state.now = target;
                        break;
                    }
                }
            };
            (timer.task)();
        }
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = state.next_id;
            let due = state.now.saturating_add(delay);
            state.timers.push(ManualTimer { id, due, task });
            id
        };

        let state: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
        TimerHandle::new(move || {
            if let Some(state) = state.upgrade() {
                state.lock().timers.retain(|t| t.id != id);
            }
        })
    }
}
