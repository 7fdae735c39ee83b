use crate::process::retry::CancelToken;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::warn;

type Task = Box<dyn FnOnce() + Send>;

/// Fixed-size worker pool draining a shared FIFO queue.
///
/// Workers are named `<prefix><n>`. Shutdown is graceful: tasks already
/// queued still run, while the pool's [`CancelToken`] is cancelled so
/// retry backoffs in flight abort instead of sleeping on.
pub struct DispatchPool {
    shared: Arc<PoolShared>,
    cancel: CancelToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    cv: Condvar,
}

struct PoolState {
    queue: VecDeque<Task>,
    shutdown: bool,
}

impl DispatchPool {
    pub fn new(thread_name_prefix: impl Into<String>, workers: usize) -> Self {
        let prefix = thread_name_prefix.into();
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let handles = (1..=workers.max(1))
            .map(|n| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("{prefix}{n}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn dispatch worker")
            })
            .collect();
        Self {
            shared,
            cancel: CancelToken::new(),
            workers: Mutex::new(handles),
        }
    }

    /// Queues a task. Returns `false` when the pool has shut down.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            drop(state);
            warn!("dispatch task rejected: pool has shut down");
            return false;
        }
        state.queue.push_back(Box::new(task));
        self.shared.cv.notify_one();
        true
    }

    /// Token cancelled at shutdown; processors wait on it between retries.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().unwrap().shutdown
    }

    /// Stops accepting tasks, cancels in-flight retry backoffs, lets the
    /// queue drain and joins every worker.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.cancel.cancel();
        self.shared.cv.notify_all();
        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break Some(task);
                }
                if state.shutdown {
                    break None;
                }
                state = shared.cv.wait(state).unwrap();
            }
        };
        match task {
            Some(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!("dispatch task panicked; worker continues");
                }
            }
            None => return,
        }
    }
}
