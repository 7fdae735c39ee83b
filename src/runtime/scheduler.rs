use crate::config::DelayedConfig;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type TimerTask = Box<dyn FnOnce() + Send>;

/// Timer pool firing queued tasks once their deadline elapses.
///
/// A fixed set of workers (named `<prefix><n>`) shares one deadline heap.
/// Task failures are logged and swallowed, so a misbehaving delayed event
/// never kills a timer worker. Shutdown refuses every task whose deadline
/// has not elapsed and joins workers within a five-second grace window.
pub struct DelayedScheduler {
    shared: Arc<TimerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

struct TimerState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: Option<TimerTask>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Handle to one pending delayed task.
pub struct DelayedHandle {
    seq: u64,
    cancelled: Arc<AtomicBool>,
    shared: Weak<TimerShared>,
}

impl DelayedHandle {
    /// Cancels the task and removes it from the queue eagerly. Returns
    /// `false` when it was already cancelled (or already fired and the
    /// cancel raced past it).
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, AtomicOrdering::SeqCst) {
            return false;
        }
        if let Some(shared) = self.shared.upgrade() {
            let mut state = shared.state.lock().unwrap();
            let seq = self.seq;
            state.heap.retain(|entry| entry.0.seq != seq);
            shared.cv.notify_all();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

impl DelayedScheduler {
    pub fn start(config: &DelayedConfig) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let handles = (1..=config.core_workers.max(1))
            .map(|n| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("{}{}", config.thread_name_prefix, n))
                    .spawn(move || timer_loop(shared))
                    .expect("failed to spawn delayed-event worker")
            })
            .collect();
        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queues `task` to run once `delay` elapses. Returns `None` when the
    /// scheduler has shut down.
    pub fn schedule(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Option<DelayedHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            drop(state);
            warn!("delayed task rejected: scheduler has shut down");
            return None;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            cancelled: cancelled.clone(),
            task: Some(Box::new(task)),
        }));
        self.shared.cv.notify_one();
        Some(DelayedHandle {
            seq,
            cancelled,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Tasks currently waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().heap.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().unwrap().shutdown
    }

    /// Refuses unexpired tasks and joins the timer workers, abandoning
    /// any that outlive the grace window.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let refused = state.heap.len();
            state.heap.clear();
            if refused > 0 {
                debug!(refused, "dropping delayed tasks whose deadline had not elapsed");
            }
        }
        self.shared.cv.notify_all();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for handle in self.workers.lock().unwrap().drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("delayed-event worker did not stop within the grace window");
            }
        }
    }
}

enum Wait {
    Fire,
    Until(Duration),
    Idle,
}

fn timer_loop(shared: Arc<TimerShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                let wait = match state.heap.peek() {
                    None => Wait::Idle,
                    Some(Reverse(entry)) => {
                        let now = Instant::now();
                        if entry.deadline <= now {
                            Wait::Fire
                        } else {
                            Wait::Until(entry.deadline - now)
                        }
                    }
                };
                match wait {
                    Wait::Fire => {
                        if let Some(Reverse(mut entry)) = state.heap.pop() {
                            if entry.cancelled.load(AtomicOrdering::SeqCst) {
                                continue;
                            }
                            if let Some(task) = entry.task.take() {
                                break task;
                            }
                        }
                    }
                    Wait::Until(duration) => {
                        let (next, _) = shared.cv.wait_timeout(state, duration).unwrap();
                        state = next;
                    }
                    Wait::Idle => {
                        state = shared.cv.wait(state).unwrap();
                    }
                }
            }
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("delayed task panicked; timer worker continues");
        }
    }
}
