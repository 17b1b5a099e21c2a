//! In-process broker queue between the optimization engine and network
//! sessions.
//!
//! The engine's brokered executor puts candidate individuals on the raw
//! queue; consumer sessions take them, ship them to remote workers, and
//! put the evaluated results back on the processed queue. Every access
//! is mutex-guarded; the engine side takes with a per-call timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::individual::Individual;

/// One unit of brokered work: an individual plus the population slot and
/// iteration it came from. The tag pair lets the executor drop results
/// that return after their batch closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Index of the individual in the submitting population.
    pub slot: usize,
    /// Iteration the work was submitted in.
    pub iteration: u32,
    /// The candidate to evaluate.
    pub individual: Individual,
}

/// Failure modes of a timed broker take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// No item arrived within the timeout.
    #[error("broker take timed out")]
    TimedOut,
    /// The broker was closed; no further items will arrive.
    #[error("broker closed")]
    Disconnected,
}

struct Shared {
    raw: Mutex<VecDeque<WorkItem>>,
    processed: Mutex<VecDeque<WorkItem>>,
    processed_cv: Condvar,
    open: AtomicBool,
}

/// Cloneable handle to the shared work queues.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// Creates an open broker with empty queues.
    pub fn new() -> Self {
        Broker {
            shared: Arc::new(Shared {
                raw: Mutex::new(VecDeque::new()),
                processed: Mutex::new(VecDeque::new()),
                processed_cv: Condvar::new(),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Whether the broker still accepts and delivers items.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Closes the broker. Blocked takers wake up with
    /// [`BrokerError::Disconnected`].
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
        self.shared.processed_cv.notify_all();
    }

    /// Enqueues raw work for the consumer sessions.
    pub fn put_raw(&self, item: WorkItem) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::Disconnected);
        }
        self.shared
            .raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
        Ok(())
    }

    /// Non-blocking take from the raw queue.
    pub fn try_take_raw(&self) -> Option<WorkItem> {
        self.shared
            .raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Enqueues a processed result for the engine side.
    pub fn put_processed(&self, item: WorkItem) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::Disconnected);
        }
        let mut processed = self
            .shared
            .processed
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        processed.push_back(item);
        self.shared.processed_cv.notify_one();
        Ok(())
    }

    /// Takes one processed item, waiting up to `timeout`.
    pub fn get_processed(&self, timeout: Duration) -> Result<WorkItem, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut processed = self
            .shared
            .processed
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = processed.pop_front() {
                return Ok(item);
            }
            if !self.is_open() {
                return Err(BrokerError::Disconnected);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BrokerError::TimedOut);
            }
            let (guard, _) = self
                .shared
                .processed_cv
                .wait_timeout(processed, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            processed = guard;
        }
    }

    /// Removes and returns everything still sitting on the raw queue.
    ///
    /// Used at batch close to reclaim work nobody picked up.
    pub fn drain_raw(&self) -> Vec<WorkItem> {
        self.shared
            .raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    /// Number of raw items waiting for a consumer.
    pub fn raw_len(&self) -> usize {
        self.shared.raw.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of processed items waiting for the engine.
    pub fn processed_len(&self) -> usize {
        self.shared
            .processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
