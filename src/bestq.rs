//! Bounded best-solutions priority queue.
//!
//! Keeps the best individuals seen so far, ordered by transformed
//! primary fitness with the better solutions near the head. One instance
//! tracks the best across the whole run, another is replaced every
//! iteration.

use serde::{Deserialize, Serialize};

use crate::individual::{Direction, Individual};

/// A fixed-capacity, direction-aware priority queue of individuals.
///
/// Capacity 0 means unlimited. Only `Clean` individuals are accepted
/// (anything else has no comparable fitness). Entries are deduplicated
/// by evaluation id, so re-adding the same evaluation is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestQueue {
    items: Vec<Individual>,
    capacity: usize,
    direction: Direction,
}

impl BestQueue {
    /// Creates an empty queue.
    pub fn new(capacity: usize, direction: Direction) -> Self {
        BestQueue {
            items: Vec::new(),
            capacity,
            direction,
        }
    }

    /// Adds copies of the clean candidates, keeping the queue sorted and
    /// truncated to capacity. With `replace = true` the queue is cleared
    /// first.
    pub fn add(&mut self, candidates: &[Individual], replace: bool) {
        if replace {
            self.items.clear();
        }
        for cand in candidates {
            if !cand.is_clean() {
                continue;
            }
            if self
                .items
                .iter()
                .any(|i| i.evaluation_id() == cand.evaluation_id())
            {
                continue;
            }
            self.items.push(cand.clone());
        }
        self.items.sort_by(|a, b| {
            let fa = a.minimized_fitness().unwrap_or(f64::MAX);
            let fb = b.minimized_fitness().unwrap_or(f64::MAX);
            fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
        });
        if self.capacity > 0 && self.items.len() > self.capacity {
            self.items.truncate(self.capacity);
        }
    }

    /// The best individual, if any.
    pub fn head(&self) -> Option<&Individual> {
        self.items.first()
    }

    /// All stored individuals, best first.
    pub fn items(&self) -> &[Individual] {
        &self.items
    }

    /// Number of stored individuals.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum size (0 = unlimited).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
