//! Submission-and-drain thread pool.
//!
//! Accepts fire-and-forget tasks with a typed result handle, runs them
//! on a fixed set of worker threads, and lets callers wait for the pool
//! to drain. Threads are started lazily on the first submission; the
//! pool can be resized once drained.
//!
//! `wait()` and `set_n_threads()` must not be called from inside a pool
//! task: both block until the in-flight counter reaches zero, which a
//! task waiting on them would prevent.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Failure of a pool task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The task panicked; the message carries the panic payload.
    #[error("pool task panicked: {0}")]
    Panicked(String),
}

struct Slot<R> {
    result: Mutex<Option<Result<R, TaskError>>>,
    ready: Condvar,
}

impl<R> Slot<R> {
    fn new() -> Self {
        Slot {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

/// A handle to a submitted task, carrying either the task's value or
/// its failure.
pub struct TaskHandle<R> {
    slot: Arc<Slot<R>>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task completes and returns its outcome.
    pub fn join(self) -> Result<R, TaskError> {
        let mut guard = self
            .slot
            .result
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while guard.is_none() {
            guard = self
                .slot
                .ready
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
        guard.take().expect("slot checked non-empty")
    }

    /// Returns the outcome if the task already completed.
    pub fn try_take(&self) -> Option<Result<R, TaskError>> {
        let mut guard = self
            .slot
            .result
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.take()
    }
}

/// Stores a task outcome into its slot. The pool contract makes this
/// infallible from the caller's point of view: if storing itself fails,
/// the submitter could never observe completion, so the process is
/// terminated with a logged reason.
fn store_result<R>(slot: &Slot<R>, value: Result<R, TaskError>) {
    let stored = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = slot.result.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(value);
        slot.ready.notify_all();
    }));
    if stored.is_err() {
        error!("failed to store a pool task result; the submitter can never observe completion");
        std::process::abort();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn increment(&self) {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_drained(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self.drained.wait(count).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn current(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct PoolState {
    n_threads: usize,
    sender: Option<Sender<Job>>,
    receiver: Option<Receiver<Job>>,
    workers: Vec<JoinHandle<()>>,
}

/// A fixed-size worker pool with drain-wait and dynamic resizing.
pub struct ThreadPool {
    submission: Mutex<()>,
    state: Mutex<PoolState>,
    started: AtomicBool,
    in_flight: Arc<InFlight>,
}

impl ThreadPool {
    /// Creates a pool that will run `n_threads` workers.
    ///
    /// A request for zero threads falls back to the machine's available
    /// parallelism with a logged warning.
    pub fn new(n_threads: usize) -> Self {
        let n_threads = if n_threads == 0 {
            let fallback = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            warn!(fallback, "requested a pool with 0 threads");
            fallback
        } else {
            n_threads
        };
        ThreadPool {
            submission: Mutex::new(()),
            state: Mutex::new(PoolState {
                n_threads,
                sender: None,
                receiver: None,
                workers: Vec::new(),
            }),
            started: AtomicBool::new(false),
            in_flight: Arc::new(InFlight {
                count: Mutex::new(0),
                drained: Condvar::new(),
            }),
        }
    }

    /// Enqueues a task and returns immediately with its handle.
    ///
    /// The handle will carry the task's value, or the panic it raised.
    pub fn submit<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let _guard = self
            .submission
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let sender = self.ensure_started();

        self.in_flight.increment();
        let slot = Arc::new(Slot::new());
        let handle = TaskHandle { slot: slot.clone() };
        let in_flight = self.in_flight.clone();
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| TaskError::Panicked(panic_message(payload)));
            store_result(&slot, outcome);
            in_flight.decrement();
        });
        sender
            .send(job)
            .expect("pool worker channel closed while submissions were allowed");
        handle
    }

    /// Blocks new submissions, then waits until every in-flight task has
    /// completed.
    pub fn wait(&self) {
        let _guard = self
            .submission
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.in_flight.wait_drained();
    }

    /// Resizes the pool: blocks submissions, drains, then grows the
    /// worker set or tears it down and recreates it at size `n`.
    ///
    /// A request for zero threads is treated as one.
    pub fn set_n_threads(&self, n: usize) {
        let n = n.max(1);
        let _guard = self
            .submission
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.in_flight.wait_drained();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !self.started.load(Ordering::Acquire) {
            state.n_threads = n;
            return;
        }
        let current = state.workers.len();
        if n == current {
            state.n_threads = n;
            return;
        }
        if n > current {
            let receiver = state
                .receiver
                .clone()
                .expect("started pool keeps its receiver");
            for idx in current..n {
                state.workers.push(spawn_worker(receiver.clone(), idx));
            }
        } else {
            // Shrinking: close the channel so the old workers exit, then
            // rebuild the pool at the new size.
            state.sender = None;
            state.receiver = None;
            for worker in state.workers.drain(..) {
                let _ = worker.join();
            }
            let (tx, rx) = unbounded::<Job>();
            for idx in 0..n {
                state.workers.push(spawn_worker(rx.clone(), idx));
            }
            state.sender = Some(tx);
            state.receiver = Some(rx);
        }
        state.n_threads = n;
    }

    /// The steady-state worker count.
    pub fn n_threads(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.started.load(Ordering::Acquire) {
            state.workers.len()
        } else {
            state.n_threads
        }
    }

    /// Number of tasks submitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    fn ensure_started(&self) -> Sender<Job> {
        if !self.started.load(Ordering::Acquire) {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !self.started.load(Ordering::Relaxed) {
                let (tx, rx) = unbounded::<Job>();
                for idx in 0..state.n_threads {
                    state.workers.push(spawn_worker(rx.clone(), idx));
                }
                state.sender = Some(tx);
                state.receiver = Some(rx);
                self.started.store(true, Ordering::Release);
            }
            return state
                .sender
                .as_ref()
                .expect("sender installed during start")
                .clone();
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .sender
            .as_ref()
            .expect("started pool keeps its sender")
            .clone()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Block submissions, drain, close the channel, join.
        let _guard = self
            .submission
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.in_flight.wait_drained();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sender = None;
        state.receiver = None;
        for worker in state.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn spawn_worker(receiver: Receiver<Job>, idx: usize) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("paropt-pool-{idx}"))
        .spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        })
        .expect("failed to spawn pool worker thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_submit_returns_value() {
        let pool = ThreadPool::new(2);
        let handle = pool.submit(|| 6 * 7);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_lazy_start() {
        let pool = ThreadPool::new(3);
        assert_eq!(pool.n_threads(), 3);
        // No workers exist until the first submission.
        {
            let state = pool.state.lock().unwrap();
            assert!(state.workers.is_empty());
        }
        pool.submit(|| ()).join().unwrap();
        {
            let state = pool.state.lock().unwrap();
            assert_eq!(state.workers.len(), 3);
        }
    }

    #[test]
    fn test_panic_is_stored_in_handle() {
        let pool = ThreadPool::new(1);
        let handle = pool.submit(|| -> u32 { panic!("boom") });
        match handle.join() {
            Err(TaskError::Panicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected panic error, got {other:?}"),
        }
        // The pool survives a panicking task.
        assert_eq!(pool.submit(|| 1).join().unwrap(), 1);
    }

    #[test]
    fn test_wait_drains_all_tasks() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = counter.clone();
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_resize_grow() {
        let pool = ThreadPool::new(1);
        pool.submit(|| ()).join().unwrap();
        pool.set_n_threads(4);
        assert_eq!(pool.n_threads(), 4);
        assert_eq!(pool.submit(|| 5).join().unwrap(), 5);
    }

    #[test]
    fn test_resize_shrink() {
        let pool = ThreadPool::new(4);
        pool.submit(|| ()).join().unwrap();
        pool.set_n_threads(2);
        assert_eq!(pool.n_threads(), 2);
        assert_eq!(pool.submit(|| 5).join().unwrap(), 5);
    }

    #[test]
    fn test_resize_before_start() {
        let pool = ThreadPool::new(2);
        pool.set_n_threads(5);
        assert_eq!(pool.n_threads(), 5);
        pool.submit(|| ()).join().unwrap();
        assert_eq!(pool.n_threads(), 5);
    }

    #[test]
    fn test_zero_threads_falls_back() {
        let pool = ThreadPool::new(0);
        assert!(pool.n_threads() >= 1);
    }

    #[test]
    fn test_many_tasks_many_submitters() {
        let pool = Arc::new(ThreadPool::new(4));
        let total = Arc::new(AtomicUsize::new(0));
        let mut joiners = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let total = total.clone();
            joiners.push(thread::spawn(move || {
                for i in 0..100usize {
                    let total = total.clone();
                    pool.submit(move || {
                        total.fetch_add(i, Ordering::SeqCst);
                    });
                }
            }));
        }
        for j in joiners {
            j.join().unwrap();
        }
        pool.wait();
        assert_eq!(total.load(Ordering::SeqCst), 4 * (0..100).sum::<usize>());
    }
}
