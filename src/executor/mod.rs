//! Uniform contract for evaluating a batch of individuals.
//!
//! An [`Executor`] receives the population buffer plus a per-position
//! mask and returns with the masked entries evaluated, regardless of
//! whether the work ran serially, on the thread pool, or on remote
//! workers behind the broker. Entries it could not evaluate stay dirty
//! in place (ordering preserved) and are additionally appended to the
//! caller's unprocessed buffer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::broker::{Broker, BrokerError, WorkItem};
use crate::error::Error;
use crate::individual::{Constraint, Individual, Objective};
use crate::pool::ThreadPool;

/// The evaluation bundle executors apply to individuals: the user's
/// objective plus an optional constraint.
#[derive(Clone)]
pub struct Evaluation {
    objective: Arc<dyn Objective>,
    constraint: Option<Arc<dyn Constraint>>,
}

impl Evaluation {
    /// Creates an unconstrained evaluation.
    pub fn new(objective: Arc<dyn Objective>) -> Self {
        Evaluation {
            objective,
            constraint: None,
        }
    }

    /// Attaches a constraint.
    pub fn with_constraint(mut self, constraint: Arc<dyn Constraint>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Evaluates one individual in place.
    pub fn evaluate(&self, individual: &mut Individual) {
        individual.evaluate(&*self.objective, self.constraint.as_deref());
    }

    /// The constraint, if any.
    pub fn constraint(&self) -> Option<&dyn Constraint> {
        self.constraint.as_deref()
    }
}

/// Evaluates the masked entries of a population buffer.
pub trait Executor: Send {
    /// Evaluates every `individuals[i]` with `mask[i] == true`.
    ///
    /// Entries that could not be evaluated within the executor's budget
    /// keep their slot (and stay dirty, or are marked processing-failed)
    /// and are appended to `out_unprocessed`. With
    /// `resubmit_unprocessed = true` the executor itself retries until
    /// success or a hard ceiling. `tag` identifies the batch; results
    /// from older batches are dropped.
    ///
    /// # Panics
    /// Panics if `mask` and `individuals` have different lengths.
    fn work_on(
        &mut self,
        individuals: &mut [Individual],
        mask: &[bool],
        out_unprocessed: &mut Vec<Individual>,
        resubmit_unprocessed: bool,
        tag: u32,
    ) -> Result<(), Error>;
}

/// Evaluates masked items in order on the caller's thread.
///
/// Never produces unprocessed items.
pub struct SerialExecutor {
    evaluation: Evaluation,
}

impl SerialExecutor {
    /// Creates a serial executor.
    pub fn new(evaluation: Evaluation) -> Self {
        SerialExecutor { evaluation }
    }
}

impl Executor for SerialExecutor {
    fn work_on(
        &mut self,
        individuals: &mut [Individual],
        mask: &[bool],
        _out_unprocessed: &mut Vec<Individual>,
        _resubmit_unprocessed: bool,
        _tag: u32,
    ) -> Result<(), Error> {
        assert_eq!(individuals.len(), mask.len(), "mask length mismatch");
        for (individual, &selected) in individuals.iter_mut().zip(mask) {
            if selected {
                self.evaluation.evaluate(individual);
            }
        }
        Ok(())
    }
}

/// Submits each masked item to the thread pool, then drains.
///
/// A task that panicked leaves its individual marked processing-failed;
/// unprocessed items are produced only in that case.
pub struct PooledExecutor {
    evaluation: Evaluation,
    pool: Arc<ThreadPool>,
}

impl PooledExecutor {
    /// Creates an executor backed by the given pool.
    pub fn new(evaluation: Evaluation, pool: Arc<ThreadPool>) -> Self {
        PooledExecutor { evaluation, pool }
    }
}

impl Executor for PooledExecutor {
    fn work_on(
        &mut self,
        individuals: &mut [Individual],
        mask: &[bool],
        out_unprocessed: &mut Vec<Individual>,
        _resubmit_unprocessed: bool,
        _tag: u32,
    ) -> Result<(), Error> {
        assert_eq!(individuals.len(), mask.len(), "mask length mismatch");
        let mut handles = Vec::new();
        for (idx, &selected) in mask.iter().enumerate() {
            if !selected {
                continue;
            }
            let mut candidate = individuals[idx].clone();
            let evaluation = self.evaluation.clone();
            handles.push((
                idx,
                self.pool.submit(move || {
                    evaluation.evaluate(&mut candidate);
                    candidate
                }),
            ));
        }
        for (idx, handle) in handles {
            match handle.join() {
                Ok(evaluated) => individuals[idx] = evaluated,
                Err(err) => {
                    warn!(slot = idx, %err, "pooled evaluation failed");
                    individuals[idx].mark_processing_failed();
                    out_unprocessed.push(individuals[idx].clone());
                }
            }
        }
        Ok(())
    }
}

/// Hands masked items to the broker queue and polls for the results the
/// consumer sessions re-inject.
///
/// Items still missing at the batch deadline become unprocessed. A
/// broker that disappears mid-batch surfaces every outstanding item as
/// unprocessed rather than dropping it.
pub struct BrokeredExecutor {
    broker: Broker,
    poll_timeout: Duration,
    batch_timeout: Duration,
    max_resubmissions: usize,
}

impl BrokeredExecutor {
    /// Creates an executor over the given broker.
    pub fn new(broker: Broker) -> Self {
        BrokeredExecutor {
            broker,
            poll_timeout: Duration::from_millis(100),
            batch_timeout: Duration::from_secs(10),
            max_resubmissions: 2,
        }
    }

    /// Sets the per-poll timeout on the processed queue.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the deadline for one batch pass.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Caps how many times an outstanding item is resubmitted when
    /// `resubmit_unprocessed` is requested.
    pub fn with_max_resubmissions(mut self, max: usize) -> Self {
        self.max_resubmissions = max;
        self
    }
}

impl Executor for BrokeredExecutor {
    fn work_on(
        &mut self,
        individuals: &mut [Individual],
        mask: &[bool],
        out_unprocessed: &mut Vec<Individual>,
        resubmit_unprocessed: bool,
        tag: u32,
    ) -> Result<(), Error> {
        assert_eq!(individuals.len(), mask.len(), "mask length mismatch");

        let mut outstanding: HashSet<usize> = HashSet::new();
        for (idx, &selected) in mask.iter().enumerate() {
            if !selected {
                continue;
            }
            let item = WorkItem {
                slot: idx,
                iteration: tag,
                individual: individuals[idx].clone(),
            };
            match self.broker.put_raw(item) {
                Ok(()) => {
                    outstanding.insert(idx);
                }
                Err(BrokerError::Disconnected) | Err(BrokerError::TimedOut) => {
                    out_unprocessed.push(individuals[idx].clone());
                }
            }
        }

        let mut resubmissions = 0usize;
        'batch: loop {
            let deadline = Instant::now() + self.batch_timeout;
            while !outstanding.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let wait = self.poll_timeout.min(deadline - now);
                match self.broker.get_processed(wait) {
                    Ok(item) => {
                        if item.iteration == tag
                            && item.slot < individuals.len()
                            && outstanding.remove(&item.slot)
                        {
                            individuals[item.slot] = item.individual;
                        } else {
                            debug!(
                                slot = item.slot,
                                iteration = item.iteration,
                                "dropping stale broker result"
                            );
                        }
                    }
                    Err(BrokerError::TimedOut) => continue,
                    Err(BrokerError::Disconnected) => break 'batch,
                }
            }
            if outstanding.is_empty()
                || !resubmit_unprocessed
                || resubmissions >= self.max_resubmissions
                || !self.broker.is_open()
            {
                break;
            }
            // Normalize the raw queue to exactly one copy per
            // outstanding slot, then poll again.
            resubmissions += 1;
            let stranded = self.broker.drain_raw();
            for item in stranded {
                if item.iteration != tag {
                    let _ = self.broker.put_raw(item);
                }
            }
            for &slot in &outstanding {
                let item = WorkItem {
                    slot,
                    iteration: tag,
                    individual: individuals[slot].clone(),
                };
                if self.broker.put_raw(item).is_err() {
                    break 'batch;
                }
            }
        }

        if !outstanding.is_empty() {
            // Reclaim copies nobody picked up so they do not resurface
            // in a later batch.
            let stranded = self.broker.drain_raw();
            for item in stranded {
                if item.iteration != tag {
                    let _ = self.broker.put_raw(item);
                }
            }
            let mut missing: Vec<usize> = outstanding.into_iter().collect();
            missing.sort_unstable();
            warn!(count = missing.len(), "batch closed with unprocessed items");
            for idx in missing {
                out_unprocessed.push(individuals[idx].clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::{Adaptor, EvalContext, Parameters};
    use std::thread;

    fn population(values: &[f64]) -> Vec<Individual> {
        values
            .iter()
            .map(|&v| {
                let mut params = Parameters::uniform_bounds(1, -100.0, 100.0).unwrap();
                params.set_values(&[v]);
                Individual::new(params, Adaptor::default())
            })
            .collect()
    }

    fn square_evaluation() -> Evaluation {
        Evaluation::new(Arc::new(|p: &[f64]| p[0] * p[0]))
    }

    #[test]
    fn test_serial_touches_only_masked() {
        let mut pop = population(&[1.0, 2.0, 3.0]);
        let mut exec = SerialExecutor::new(square_evaluation());
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true, false, true], &mut unprocessed, false, 0)
            .unwrap();
        assert!(pop[0].is_clean());
        assert!(!pop[1].is_clean());
        assert!(pop[2].is_clean());
        assert_eq!(pop[2].raw_fitness().unwrap(), 9.0);
        assert!(unprocessed.is_empty());
    }

    #[test]
    fn test_pooled_evaluates_all_masked() {
        let mut pop = population(&[1.0, 2.0, 3.0, 4.0]);
        let pool = Arc::new(ThreadPool::new(2));
        let mut exec = PooledExecutor::new(square_evaluation(), pool);
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true; 4], &mut unprocessed, false, 0)
            .unwrap();
        for (ind, expect) in pop.iter().zip([1.0, 4.0, 9.0, 16.0]) {
            assert_eq!(ind.raw_fitness().unwrap(), expect);
        }
        assert!(unprocessed.is_empty());
    }

    struct PanicOnNegative;
    impl Objective for PanicOnNegative {
        fn evaluate(&self, params: &[f64], _ctx: &mut EvalContext) -> f64 {
            assert!(params[0] >= 0.0, "negative input");
            params[0]
        }
    }

    #[test]
    fn test_pooled_marks_failed_tasks() {
        let mut pop = population(&[1.0, -1.0, 2.0]);
        let pool = Arc::new(ThreadPool::new(2));
        let evaluation = Evaluation::new(Arc::new(PanicOnNegative));
        let mut exec = PooledExecutor::new(evaluation, pool);
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true; 3], &mut unprocessed, false, 0)
            .unwrap();
        assert!(pop[0].is_clean());
        assert!(pop[1].processing_failed());
        assert!(!pop[1].is_clean());
        assert!(pop[2].is_clean());
        assert_eq!(unprocessed.len(), 1);
    }

    /// A worker loop that services the broker like a consumer session
    /// would, evaluating in-process.
    fn spawn_fake_worker(broker: Broker, evaluation: Evaluation) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let idle = Duration::from_millis(2);
            let mut empty_polls = 0;
            while empty_polls < 100 {
                match broker.try_take_raw() {
                    Some(mut item) => {
                        empty_polls = 0;
                        evaluation.evaluate(&mut item.individual);
                        if broker.put_processed(item).is_err() {
                            return;
                        }
                    }
                    None => {
                        empty_polls += 1;
                        thread::sleep(idle);
                    }
                }
            }
        })
    }

    #[test]
    fn test_brokered_roundtrip() {
        let broker = Broker::new();
        let worker = spawn_fake_worker(broker.clone(), square_evaluation());

        let mut pop = population(&[2.0, 5.0]);
        let mut exec = BrokeredExecutor::new(broker.clone())
            .with_batch_timeout(Duration::from_secs(5))
            .with_poll_timeout(Duration::from_millis(20));
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true, true], &mut unprocessed, false, 1)
            .unwrap();

        assert!(unprocessed.is_empty());
        assert_eq!(pop[0].raw_fitness().unwrap(), 4.0);
        assert_eq!(pop[1].raw_fitness().unwrap(), 25.0);
        broker.close();
        worker.join().unwrap();
    }

    #[test]
    fn test_brokered_times_out_to_unprocessed() {
        let broker = Broker::new();
        // No worker at all: everything must surface as unprocessed.
        let mut pop = population(&[2.0, 5.0]);
        let mut exec = BrokeredExecutor::new(broker)
            .with_batch_timeout(Duration::from_millis(50))
            .with_poll_timeout(Duration::from_millis(10));
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true, true], &mut unprocessed, false, 1)
            .unwrap();
        assert_eq!(unprocessed.len(), 2);
        assert!(!pop[0].is_clean());
        assert!(!pop[1].is_clean());
    }

    #[test]
    fn test_brokered_drops_stale_results() {
        let broker = Broker::new();
        // Inject a result from a previous batch before starting.
        let mut stale = population(&[9.0]).remove(0);
        square_evaluation().evaluate(&mut stale);
        broker
            .put_processed(WorkItem {
                slot: 0,
                iteration: 0,
                individual: stale,
            })
            .unwrap();

        let worker = spawn_fake_worker(broker.clone(), square_evaluation());
        let mut pop = population(&[3.0]);
        let mut exec = BrokeredExecutor::new(broker.clone())
            .with_batch_timeout(Duration::from_secs(5))
            .with_poll_timeout(Duration::from_millis(20));
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true], &mut unprocessed, false, 3)
            .unwrap();

        // The fresh result won, not the stale injection.
        assert_eq!(pop[0].raw_fitness().unwrap(), 9.0);
        assert!(unprocessed.is_empty());
        broker.close();
        worker.join().unwrap();
    }

    #[test]
    fn test_brokered_disconnected_surfaces_unprocessed() {
        let broker = Broker::new();
        broker.close();
        let mut pop = population(&[1.0]);
        let mut exec = BrokeredExecutor::new(broker);
        let mut unprocessed = Vec::new();
        exec.work_on(&mut pop, &[true], &mut unprocessed, true, 0)
            .unwrap();
        assert_eq!(unprocessed.len(), 1);
    }
}
