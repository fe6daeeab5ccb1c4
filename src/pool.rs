// src/pool.rs
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::error::{MazurkaError, MazurkaResult};

/// A unit of work the pool can execute. Implemented by whatever carries
/// the processing capability; the pool itself knows nothing about
/// connections.
pub trait Task: Send + 'static {
    fn run(self);
}

struct State<T> {
    queue: VecDeque<T>,
    shutdown: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

/// Fixed set of long-lived worker threads draining a bounded FIFO queue.
/// Pool size and queue capacity are fixed at construction.
pub struct ThreadPool<T: Task> {
    shared: Arc<Shared<T>>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Task> ThreadPool<T> {
    pub fn new(threads: usize, capacity: usize) -> MazurkaResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = Arc::clone(&shared);
            let core = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[i % core_ids.len()])
            };
            let handle = thread::Builder::new()
                .name(format!("mazurka-worker-{}", i))
                .spawn(move || {
                    if let Some(id) = core {
                        if core_affinity::set_for_current(id) {
                            tracing::debug!(worker = i, core = id.id, "worker pinned");
                        }
                    }
                    worker_loop(shared);
                })
                .map_err(|e| MazurkaError::Pool(e.to_string()))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            capacity,
            workers,
        })
    }

    /// Enqueue without blocking. `false` means the queue is at capacity
    /// (or the pool is shutting down) and the task was not accepted; the
    /// caller must treat the work as not done.
    pub fn submit(&self, task: T) -> bool {
        let mut state = lock(&self.shared.state);
        if state.shutdown || state.queue.len() >= self.capacity {
            return false;
        }
        state.queue.push_back(task);
        drop(state);
        self.shared.available.notify_one();
        true
    }

    /// Flip the shutdown flag under the queue mutex and wake every
    /// worker, so none can stay blocked on the condvar past shutdown.
    /// Already-queued tasks are drained before the workers exit.
    pub fn shutdown(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<T: Task> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T: Task>(shared: Arc<Shared<T>>) {
    loop {
        let task = {
            let mut state = lock(&shared.state);
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };
        // The mutex is released before the task runs; processing never
        // holds up submission or the other workers.
        task.run();
    }
}

fn lock<T>(mutex: &Mutex<State<T>>) -> MutexGuard<'_, State<T>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
