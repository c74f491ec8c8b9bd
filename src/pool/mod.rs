//! A fixed-size worker pool with a batch submit/wait discipline
//!
//! The pool is created once at startup and reused by every per-ligand
//! fan-out, so no threads churn between ligands. Exactly one batch may be
//! outstanding at a time: the host submits, blocks in [`TaskPool::wait`],
//! and observes per-task failures after the batch drains. A worker panic is
//! isolated to its task; the surviving workers keep serving batches.

use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A nullary work unit.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// One task of a batch failed by panicking.
#[derive(Debug)]
pub struct TaskFailure {
    /// Index of the task within its batch.
    pub index: usize,
    pub message: String,
}

/// The aggregated outcome of one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub failures: Vec<TaskFailure>,
}

impl BatchReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

struct State {
    tasks: Vec<Option<Task>>,
    next: usize,
    completed: usize,
    failures: Vec<TaskFailure>,
    pending: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    task_ready: Condvar,
    batch_done: Condvar,
}

/// The fixed worker set shared by all callers.
pub struct TaskPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: Vec::new(),
                next: 0,
                completed: 0,
                failures: Vec::new(),
                pending: false,
                shutdown: false,
            }),
            task_ready: Condvar::new(),
            batch_done: Condvar::new(),
        });
        let workers = (0..num_threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Hands an ordered collection of work units to the pool. Tasks are
    /// picked up by workers in unspecified order.
    ///
    /// # Panics
    ///
    /// Submitting while a batch is outstanding is a caller error.
    pub fn submit_batch(&self, tasks: Vec<Task>) {
        let mut state = self.shared.state.lock();
        assert!(!state.pending, "a batch is already outstanding");
        state.tasks = tasks.into_iter().map(Some).collect();
        state.next = 0;
        state.completed = 0;
        state.failures.clear();
        state.pending = true;
        drop(state);
        self.shared.task_ready.notify_all();
    }

    /// Blocks until every task of the current batch has completed, and
    /// reports the tasks that panicked. The batch slot is free afterwards.
    pub fn wait(&self) -> BatchReport {
        let mut state = self.shared.state.lock();
        while state.completed < state.tasks.len() {
            self.shared.batch_done.wait(&mut state);
        }
        state.pending = false;
        state.tasks.clear();
        let mut failures = std::mem::take(&mut state.failures);
        failures.sort_by_key(|f| f.index);
        BatchReport { failures }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.task_ready.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let (index, task) = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if state.next < state.tasks.len() {
                    let index = state.next;
                    state.next += 1;
                    let task = state.tasks[index].take().expect("task taken twice");
                    break (index, task);
                }
                shared.task_ready.wait(&mut state);
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(task));

        let mut state = shared.state.lock();
        state.completed += 1;
        if let Err(payload) = outcome {
            state.failures.push(TaskFailure {
                index,
                message: panic_message(payload.as_ref()),
            });
        }
        if state.completed == state.tasks.len() {
            shared.batch_done.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
