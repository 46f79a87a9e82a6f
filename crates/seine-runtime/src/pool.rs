//! Fixed worker pool.
//!
//! Spawns N OS threads at creation. Workers dequeue boxed tasks in
//! FIFO order from a `Mutex<VecDeque>` + condvar and run each to
//! completion before taking the next. `enqueue` hands back a
//! [`TaskHandle`] that resolves to the task's result.
//!
//! Shutdown signals all workers, drops queued-but-unstarted tasks
//! (their handles resolve to `Error::TaskAborted` so no waiter blocks
//! forever), and joins every thread. In-flight tasks run to
//! completion. Handlers are expected to be short; a task that never
//! returns occupies one worker permanently — there is no deadline
//! propagation at this layer.

use seine_core::{Error, Result};

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum TaskState<T> {
    Pending,
    Done(T),
    Aborted,
}

struct TaskSlot<T> {
    state: Mutex<TaskState<T>>,
    cond: Condvar,
}

impl<T> TaskSlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::Pending),
            cond: Condvar::new(),
        }
    }

    fn complete(&self, value: T) {
        let mut st = self.state.lock().unwrap();
        *st = TaskState::Done(value);
        drop(st);
        self.cond.notify_all();
    }

    fn abort(&self) {
        let mut st = self.state.lock().unwrap();
        if matches!(*st, TaskState::Pending) {
            *st = TaskState::Aborted;
        }
        drop(st);
        self.cond.notify_all();
    }
}

/// Future-like handle to a submitted task.
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes. `Err(TaskAborted)` if the pool
    /// shut down before the task ran.
    pub fn wait(self) -> Result<T> {
        let mut st = self.slot.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *st, TaskState::Aborted) {
                TaskState::Done(value) => return Ok(value),
                TaskState::Aborted => return Err(Error::TaskAborted),
                TaskState::Pending => {
                    *st = TaskState::Pending;
                    st = self.slot.cond.wait(st).unwrap();
                }
            }
        }
    }

    /// Non-blocking completion check.
    pub fn is_done(&self) -> bool {
        !matches!(*self.slot.state.lock().unwrap(), TaskState::Pending)
    }
}

/// Marks the slot aborted if the job is dropped without running.
struct CompletionGuard<T> {
    slot: Arc<TaskSlot<T>>,
    fired: bool,
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if !self.fired {
            self.slot.abort();
        }
    }
}

struct PoolState {
    tasks: VecDeque<Job>,
    stopping: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    cond: Condvar,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    total: usize,
}

impl WorkerPool {
    /// Create a pool with `n` workers (at least 1).
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                stopping: false,
            }),
            cond: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("seine-worker-{}", worker_id))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        WorkerPool {
            shared,
            handles: Mutex::new(handles),
            total: n,
        }
    }

    /// Submit a task. Fails with `PoolStopped` once shutdown has begun.
    pub fn enqueue<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(TaskSlot::new());
        let handle = TaskHandle {
            slot: Arc::clone(&slot),
        };
        let mut guard = CompletionGuard { slot, fired: false };
        let job: Job = Box::new(move || {
            let value = f();
            guard.fired = true;
            guard.slot.complete(value);
        });

        {
            let mut st = self.shared.state.lock().unwrap();
            if st.stopping {
                return Err(Error::PoolStopped);
            }
            st.tasks.push_back(job);
        }
        self.shared.cond.notify_one();
        Ok(handle)
    }

    pub fn total_workers(&self) -> usize {
        self.total
    }

    /// Signal stop, drop queued tasks, wake and join every worker.
    /// Idempotent.
    pub fn shutdown(&self) {
        let dropped: Vec<Job> = {
            let mut st = self.shared.state.lock().unwrap();
            st.stopping = true;
            st.tasks.drain(..).collect()
        };
        self.shared.cond.notify_all();
        // Dropping aborts the queued tasks' handles.
        drop(dropped);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop: FIFO dequeue, run to completion, repeat.
fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut st = shared.state.lock().unwrap();
            loop {
                if let Some(job) = st.tasks.pop_front() {
                    break job;
                }
                if st.stopping {
                    return;
                }
                st = shared.cond.wait(st).unwrap();
            }
        };
        job();
    }
}
