//! The optimization-loop driver.
//!
//! [`Engine`] owns the run state (iteration counters, stall accounting,
//! best-solution queues, RNG, checkpoints) and drives a pluggable
//! [`Algorithm`] through adapt → evaluate → select cycles until a halt
//! criterion strikes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bestq::BestQueue;
use crate::error::Error;
use crate::executor::Executor;
use crate::individual::{Direction, FitnessPair, Individual};
use crate::random::{create_rng, create_rng_entropy, Prng};

use super::checkpoint::write_checkpoint;
use super::config::EngineConfig;
use super::monitor::{Monitor, RunStatus};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// The external halt flag was raised (signal handler, UI, ...).
    ExternalSignal,
    /// The termination file was touched after run start.
    TouchedTerminationFile,
    /// The iteration limit was reached.
    MaxIterations,
    /// The stall counter exceeded its limit.
    StallLimit,
    /// The wall-clock limit was exceeded.
    MaxDuration,
    /// The raw primary fitness crossed the quality threshold.
    QualityThreshold,
    /// The user's halt predicate returned true.
    Custom,
}

impl HaltReason {
    /// Human-readable name of the criterion.
    pub fn describe(self) -> &'static str {
        match self {
            HaltReason::ExternalSignal => "external signal",
            HaltReason::TouchedTerminationFile => "touched termination file",
            HaltReason::MaxIterations => "maximum iterations reached",
            HaltReason::StallLimit => "stall limit exceeded",
            HaltReason::MaxDuration => "maximum duration exceeded",
            HaltReason::QualityThreshold => "quality threshold exceeded",
            HaltReason::Custom => "custom halt",
        }
    }
}

/// Per-iteration context handed to [`Algorithm::cycle_logic`].
pub struct Cycle<'a> {
    /// Evaluates batches of individuals.
    pub executor: &'a mut dyn Executor,
    /// The engine's random stream.
    pub rng: &'a mut Prng,
    /// Current iteration number.
    pub iteration: u32,
    /// Optimization direction of the run.
    pub direction: Direction,
    /// Whether executors should retry unprocessed items themselves.
    pub resubmit_unprocessed: bool,
}

/// A population-based optimization algorithm driven by the [`Engine`].
///
/// Implementations own their population and provide the
/// algorithm-specific parts of an iteration; the engine supplies halt
/// criteria, checkpointing, stall accounting, and monitors.
pub trait Algorithm: Clone + Serialize + DeserializeOwned + Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The current population.
    fn population(&self) -> &[Individual];

    /// Mutable population access.
    fn population_mut(&mut self) -> &mut Vec<Individual>;

    /// Target population size for [`Engine::optimize`]'s adjustment
    /// step.
    fn default_population_size(&self) -> usize;

    /// Whether filler individuals created during population adjustment
    /// are randomized (default) or plain clones of the template.
    fn random_fill_up(&self) -> bool {
        true
    }

    /// Attaches this algorithm's personality records to every
    /// individual.
    fn assign_personalities(&mut self);

    /// Runs one iteration and returns the best `(raw, transformed)`
    /// primary fitness it produced.
    fn cycle_logic(&mut self, cycle: &mut Cycle<'_>) -> Result<FitnessPair, Error>;

    /// Reacts to a stall streak (e.g. widening adaption steps).
    fn act_on_stalls(&mut self, _rng: &mut Prng) {}

    /// Cleanup hook invoked after the loop exits.
    fn finalize(&mut self) {}
}

/// Outcome of one [`Engine::optimize`] call.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The criterion that stopped the run.
    pub halt_reason: HaltReason,
    /// Number of iterations executed in this call.
    pub iterations: u32,
    /// Best raw primary fitness of the run.
    pub best_raw: f64,
    /// Best transformed primary fitness of the run.
    pub best_transformed: f64,
    /// The best individual, if the global queue holds one.
    pub best_individual: Option<Individual>,
    /// Best raw fitness at the end of each iteration.
    pub fitness_history: Vec<f64>,
}

/// Serializable whole-run state, sufficient to resume at the next
/// iteration. The user's objective is re-attached through the executor
/// on restore.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "A: Serialize", deserialize = "A: DeserializeOwned"))]
pub struct EngineSnapshot<A> {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Iteration to resume at.
    pub iteration: u32,
    /// Offset of the interrupted run.
    pub offset: u32,
    /// Stall counter.
    pub stalls: u64,
    /// Best primary fitness seen.
    pub best_known: FitnessPair,
    /// Best-across-run queue.
    pub global_best: BestQueue,
    /// Best-of-iteration queue.
    pub iteration_best: BestQueue,
    /// The random stream, resumed exactly.
    pub rng: Prng,
    /// Algorithm state including the population.
    pub algorithm: A,
}

/// Drives a single optimization run from start to halt.
pub struct Engine<A: Algorithm> {
    algorithm: A,
    config: EngineConfig,
    executor: Box<dyn Executor>,
    monitors: Vec<Box<dyn Monitor>>,
    custom_halt: Option<Box<dyn Fn(&RunStatus) -> bool + Send>>,
    halt_flag: Arc<AtomicBool>,
    rng: Prng,
    iteration: u32,
    offset: u32,
    stalls: u64,
    best_known: FitnessPair,
    global_best: BestQueue,
    iteration_best: BestQueue,
}

impl<A: Algorithm> Engine<A> {
    /// Creates an engine around an algorithm and an executor.
    pub fn new(
        algorithm: A,
        config: EngineConfig,
        executor: Box<dyn Executor>,
    ) -> Result<Self, Error> {
        config.validate().map_err(Error::User)?;
        let direction = config.direction();
        let rng = match config.seed {
            Some(seed) => create_rng(seed),
            None => create_rng_entropy(),
        };
        Ok(Engine {
            best_known: FitnessPair::worst(direction),
            global_best: BestQueue::new(config.n_record_best_individuals, direction),
            iteration_best: BestQueue::new(0, direction),
            algorithm,
            config,
            executor,
            monitors: Vec::new(),
            custom_halt: None,
            halt_flag: Arc::new(AtomicBool::new(false)),
            rng,
            iteration: 0,
            offset: 0,
            stalls: 0,
        })
    }

    /// Rebuilds an engine from a checkpoint snapshot. The executor
    /// carries the re-attached objective; monitors and custom halt
    /// predicates are re-registered by the caller.
    pub fn from_snapshot(snapshot: EngineSnapshot<A>, executor: Box<dyn Executor>) -> Self {
        Engine {
            algorithm: snapshot.algorithm,
            config: snapshot.config,
            executor,
            monitors: Vec::new(),
            custom_halt: None,
            halt_flag: Arc::new(AtomicBool::new(false)),
            rng: snapshot.rng,
            iteration: snapshot.iteration,
            offset: snapshot.offset,
            stalls: snapshot.stalls,
            best_known: snapshot.best_known,
            global_best: snapshot.global_best,
            iteration_best: snapshot.iteration_best,
        }
    }

    /// Clones the current state into a serializable snapshot.
    pub fn snapshot(&self) -> EngineSnapshot<A> {
        EngineSnapshot {
            config: self.config.clone(),
            iteration: self.iteration,
            offset: self.offset,
            stalls: self.stalls,
            best_known: self.best_known,
            global_best: self.global_best.clone(),
            iteration_best: self.iteration_best.clone(),
            rng: self.rng.clone(),
            algorithm: self.algorithm.clone(),
        }
    }

    /// Registers a pluggable monitor.
    pub fn register_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.push(monitor);
    }

    /// Installs a user-defined halt predicate.
    pub fn set_custom_halt(&mut self, halt: impl Fn(&RunStatus) -> bool + Send + 'static) {
        self.custom_halt = Some(Box::new(halt));
    }

    /// The external halt flag. Raise it (e.g. from a signal handler) to
    /// stop the run at the next iteration boundary.
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        self.halt_flag.clone()
    }

    /// The wrapped algorithm.
    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    /// Mutable access to the wrapped algorithm (e.g. to seed the
    /// population before the run).
    pub fn algorithm_mut(&mut self) -> &mut A {
        &mut self.algorithm
    }

    /// Best-across-run queue.
    pub fn global_best(&self) -> &BestQueue {
        &self.global_best
    }

    /// Best-of-last-iteration queue.
    pub fn iteration_best(&self) -> &BestQueue {
        &self.iteration_best
    }

    /// The iteration the engine is currently at.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Drives the run from `offset` until a halt criterion strikes.
    pub fn optimize(&mut self, offset: u32) -> Result<RunSummary, Error> {
        self.config.validate().map_err(Error::User)?;
        let direction = self.config.direction();
        self.iteration = offset;
        self.offset = offset;
        self.stalls = 0;

        // Chained runs keep their earlier bests.
        self.global_best.add(self.algorithm.population(), false);

        self.adjust_population()?;
        self.apply_policy_bundle()?;
        self.algorithm.assign_personalities();

        let status = self.status();
        for monitor in &mut self.monitors {
            monitor.on_run_start(&status);
        }

        let run_started = Instant::now();
        let run_started_sys = SystemTime::now();
        self.best_known = FitnessPair::worst(direction);
        let mut fitness_history = Vec::new();

        let halt_reason = loop {
            let iteration = self.iteration;
            for individual in self.algorithm.population_mut().iter_mut() {
                individual.set_assigned_iteration(iteration);
            }

            let best = {
                let mut cycle = Cycle {
                    executor: self.executor.as_mut(),
                    rng: &mut self.rng,
                    iteration,
                    direction,
                    resubmit_unprocessed: self.config.resubmit_unprocessed,
                };
                self.algorithm.cycle_logic(&mut cycle)?
            };

            let improved = direction.is_better(best.transformed, self.best_known.transformed);
            if improved {
                self.best_known = best;
                self.stalls = 0;
            } else {
                self.stalls += 1;
            }
            fitness_history.push(self.best_known.raw);

            self.global_best.add(self.algorithm.population(), false);
            self.iteration_best.add(self.algorithm.population(), true);

            if self.checkpoint_due(improved) {
                self.write_checkpoint_file(false)?;
            }

            let best_known = self.best_known;
            let stalls = self.stalls;
            for individual in self.algorithm.population_mut().iter_mut() {
                individual.set_best_known(best_known);
                individual.set_stall_count(stalls);
            }

            let stall_threshold = self.config.individual_update_stall_counter_threshold;
            if stall_threshold > 0 && self.stalls > stall_threshold {
                self.algorithm.act_on_stalls(&mut self.rng);
            }

            let report = self.config.report_iteration;
            if report > 0 && iteration % report == 0 {
                let status = self.status();
                for monitor in &mut self.monitors {
                    monitor.on_iteration(&status);
                }
            }

            self.iteration += 1;

            if let Some(reason) = self.evaluate_halt(run_started, run_started_sys) {
                if self.config.cp_interval != 0 {
                    self.write_checkpoint_file(true)?;
                }
                if self.config.emit_termination_reason {
                    info!(
                        algorithm = self.algorithm.name(),
                        reason = reason.describe(),
                        best_raw = self.best_known.raw,
                        "optimization halted"
                    );
                }
                break reason;
            }
        };

        self.algorithm.finalize();
        let status = self.status();
        for monitor in &mut self.monitors {
            monitor.on_run_end(&status);
        }
        for individual in self.algorithm.population_mut().iter_mut() {
            individual.clear_personality();
        }

        Ok(RunSummary {
            halt_reason,
            iterations: self.iteration - offset,
            best_raw: self.best_known.raw,
            best_transformed: self.best_known.transformed,
            best_individual: self.global_best.head().cloned(),
            fitness_history,
        })
    }

    fn status(&self) -> RunStatus {
        RunStatus {
            iteration: self.iteration,
            best_raw: self.best_known.raw,
            best_transformed: self.best_known.transformed,
            stalls: self.stalls,
        }
    }

    /// Resizes the population to the algorithm's default size by
    /// randomly initializing fillers cloned from the first individual.
    fn adjust_population(&mut self) -> Result<(), Error> {
        let target = self.algorithm.default_population_size();
        let population = self.algorithm.population_mut();
        if population.is_empty() {
            return Err(Error::User(
                "no individuals were supplied to the algorithm".to_string(),
            ));
        }
        let template = population[0].clone();
        let randomize = self.algorithm.random_fill_up();
        let population = self.algorithm.population_mut();
        while population.len() < target {
            let mut filler = template.clone();
            filler.clear_personality();
            if randomize {
                filler.randomize(&mut self.rng);
            }
            population.push(filler);
        }
        Ok(())
    }

    fn apply_policy_bundle(&mut self) -> Result<(), Error> {
        let policy = self.config.eval_policy;
        let direction = self.config.direction();
        let steepness = self.config.steepness;
        let barrier = self.config.barrier;
        let max_unsuccessful = self.config.max_unsuccessful_adaptions;
        for individual in self.algorithm.population_mut().iter_mut() {
            individual.set_eval_policy(policy);
            individual.set_direction(direction);
            individual.set_steepness(steepness)?;
            individual.set_barrier(barrier)?;
            individual.set_max_unsuccessful_adaptions(max_unsuccessful);
        }
        Ok(())
    }

    fn checkpoint_due(&self, improved: bool) -> bool {
        match self.config.cp_interval {
            0 => false,
            -1 => improved,
            n => {
                let n = n as u32;
                n > 0 && self.iteration % n == 0
            }
        }
    }

    fn write_checkpoint_file(&self, is_final: bool) -> Result<(), Error> {
        let snapshot = self.snapshot();
        match write_checkpoint(
            &snapshot,
            &self.config,
            self.iteration,
            self.best_known.raw,
            is_final,
        ) {
            Ok(_) => Ok(()),
            Err(err) => {
                // A failed checkpoint should not kill the run.
                warn!(%err, "checkpoint write failed");
                Ok(())
            }
        }
    }

    /// Evaluates the halt criteria. User-triggered criteria take
    /// precedence; automatic ones apply only past the minimum-iteration
    /// and minimum-time thresholds.
    fn evaluate_halt(&self, started: Instant, started_sys: SystemTime) -> Option<HaltReason> {
        if self.halt_flag.load(Ordering::Relaxed) {
            return Some(HaltReason::ExternalSignal);
        }
        if self.config.touched_termination_active {
            if let Some(path) = &self.config.termination_file {
                // An absent file is no signal.
                if let Ok(meta) = std::fs::metadata(path) {
                    if let Ok(modified) = meta.modified() {
                        if modified > started_sys {
                            return Some(HaltReason::TouchedTerminationFile);
                        }
                    }
                }
            }
        }

        let past_min_iteration = self.iteration >= self.config.min_iteration;
        let past_min_duration = self
            .config
            .min_duration
            .map(|min| started.elapsed() >= min)
            .unwrap_or(true);
        if !(past_min_iteration && past_min_duration) {
            return None;
        }

        if self.config.max_iteration > 0 && self.iteration >= self.config.max_iteration {
            return Some(HaltReason::MaxIterations);
        }
        if self.config.max_stall_iteration > 0 && self.stalls > self.config.max_stall_iteration {
            return Some(HaltReason::StallLimit);
        }
        if let Some(max) = self.config.max_duration {
            if started.elapsed() > max {
                return Some(HaltReason::MaxDuration);
            }
        }
        if self.config.threshold_active
            && self
                .config
                .direction()
                .is_better(self.best_known.raw, self.config.threshold)
        {
            return Some(HaltReason::QualityThreshold);
        }
        if let Some(custom) = &self.custom_halt {
            if custom(&self.status()) {
                return Some(HaltReason::Custom);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::population::{repair_after_submission, update_worst_known_valid};
    use crate::executor::{Evaluation, SerialExecutor};
    use crate::individual::{Adaptor, Parameters};
    use crate::net::SerializationMode;
    use std::sync::Arc;

    /// A minimal elitist random walk, enough to exercise the loop
    /// mechanics without the full evolutionary machinery.
    #[derive(Clone, Serialize, Deserialize)]
    struct RandomWalk {
        population: Vec<Individual>,
        size: usize,
    }

    impl RandomWalk {
        fn new(size: usize) -> Self {
            RandomWalk {
                population: Vec::new(),
                size,
            }
        }
    }

    impl Algorithm for RandomWalk {
        fn name(&self) -> &'static str {
            "random-walk"
        }

        fn population(&self) -> &[Individual] {
            &self.population
        }

        fn population_mut(&mut self) -> &mut Vec<Individual> {
            &mut self.population
        }

        fn default_population_size(&self) -> usize {
            self.size
        }

        fn assign_personalities(&mut self) {}

        fn cycle_logic(&mut self, cycle: &mut Cycle<'_>) -> Result<FitnessPair, Error> {
            let elite = self.population.first().cloned();
            for individual in self.population.iter_mut().skip(1) {
                if let Some(elite) = &elite {
                    let values = elite.params().values().to_vec();
                    individual.params_mut().set_values(&values);
                }
                individual.adapt(cycle.rng);
            }
            let mask: Vec<bool> = self.population.iter().map(|i| !i.is_clean()).collect();
            let mut unprocessed = Vec::new();
            cycle.executor.work_on(
                &mut self.population,
                &mask,
                &mut unprocessed,
                cycle.resubmit_unprocessed,
                cycle.iteration,
            )?;
            update_worst_known_valid(&mut self.population, cycle.direction);
            repair_after_submission(&mut self.population, self.size)?;
            // Elitist: re-insert the previous best if everything got worse.
            if let Some(elite) = elite {
                if elite.is_clean() {
                    self.population.push(elite);
                }
            }
            self.population.sort_by(|a, b| {
                let fa = a.minimized_fitness().unwrap_or(f64::MAX);
                let fb = b.minimized_fitness().unwrap_or(f64::MAX);
                fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
            });
            self.population.truncate(self.size);
            let best = &self.population[0];
            Ok(FitnessPair {
                raw: best.raw_fitness()?,
                transformed: best.transformed_fitness()?,
            })
        }
    }

    fn sphere_engine(config: EngineConfig) -> Engine<RandomWalk> {
        let mut algorithm = RandomWalk::new(8);
        let mut params = Parameters::uniform_bounds(3, -5.0, 5.0).unwrap();
        params.set_values(&[3.0, -2.0, 4.0]);
        algorithm.population.push(Individual::new(
            params,
            Adaptor::GaussianStep {
                sigma: 0.3,
                probability: 1.0,
            },
        ));
        let evaluation =
            Evaluation::new(Arc::new(|p: &[f64]| p.iter().map(|x| x * x).sum::<f64>()));
        let executor = Box::new(SerialExecutor::new(evaluation));
        Engine::new(algorithm, config, executor).unwrap()
    }

    fn constant_engine(config: EngineConfig) -> Engine<RandomWalk> {
        let mut algorithm = RandomWalk::new(4);
        let params = Parameters::uniform_bounds(2, -5.0, 5.0).unwrap();
        algorithm
            .population
            .push(Individual::new(params, Adaptor::default()));
        let evaluation = Evaluation::new(Arc::new(|_: &[f64]| 1.0));
        let executor = Box::new(SerialExecutor::new(evaluation));
        Engine::new(algorithm, config, executor).unwrap()
    }

    #[test]
    fn test_runs_until_max_iterations() {
        let config = EngineConfig::default()
            .with_max_iteration(25)
            .with_seed(42);
        let mut engine = sphere_engine(config);
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::MaxIterations);
        assert_eq!(summary.iterations, 25);
        assert_eq!(summary.fitness_history.len(), 25);
    }

    #[test]
    fn test_elitist_history_never_worsens() {
        let config = EngineConfig::default()
            .with_max_iteration(60)
            .with_seed(7);
        let mut engine = sphere_engine(config);
        let summary = engine.optimize(0).unwrap();
        for window in summary.fitness_history.windows(2) {
            assert!(
                window[1] <= window[0] + 1e-12,
                "best fitness regressed: {} -> {}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_stall_halt_on_constant_fitness() {
        let config = EngineConfig::default()
            .with_max_iteration(0)
            .with_max_stall_iteration(5)
            .with_seed(42);
        let mut engine = constant_engine(config);
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::StallLimit);
        // One improving iteration (from worst_case), then 6 stalls.
        assert!(summary.iterations <= 10);
    }

    #[test]
    fn test_quality_threshold_halt() {
        let config = EngineConfig::default()
            .with_max_iteration(5000)
            .with_threshold(1e-2)
            .with_seed(42);
        let mut engine = sphere_engine(config);
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::QualityThreshold);
        assert!(summary.best_raw < 1e-2);
    }

    #[test]
    fn test_external_halt_flag() {
        let config = EngineConfig::default().with_max_iteration(0).with_seed(1);
        let mut engine = constant_engine(config);
        let flag = engine.halt_flag();
        flag.store(true, Ordering::Relaxed);
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::ExternalSignal);
        assert_eq!(summary.iterations, 1);
    }

    #[test]
    fn test_touched_termination_file() {
        let dir = tempfile::tempdir().unwrap();
        let halt_file = dir.path().join("halt.flag");

        let config = EngineConfig::default()
            .with_max_iteration(0)
            .with_termination_file(&halt_file)
            .with_seed(1);
        let mut engine = constant_engine(config);

        // Touch the file from a custom halt probe at iteration 30.
        let touch_path = halt_file.clone();
        engine.set_custom_halt(move |status| {
            if status.iteration == 30 {
                std::fs::write(&touch_path, b"stop").unwrap();
            }
            false
        });

        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::TouchedTerminationFile);
        assert!(summary.iterations >= 30 && summary.iterations < 40);
    }

    #[test]
    fn test_custom_halt() {
        let config = EngineConfig::default().with_max_iteration(0).with_seed(1);
        let mut engine = constant_engine(config);
        engine.set_custom_halt(|status| status.iteration >= 12);
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::Custom);
    }

    #[test]
    fn test_min_iteration_gates_automatic_halts() {
        let config = EngineConfig::default()
            .with_max_iteration(5)
            .with_min_iteration(20)
            .with_max_stall_iteration(2)
            .with_seed(1);
        let mut engine = constant_engine(config);
        let summary = engine.optimize(0).unwrap();
        // Nothing may halt before iteration 20.
        assert!(summary.iterations >= 20);
    }

    #[test]
    fn test_empty_population_is_a_user_error() {
        let algorithm = RandomWalk::new(4);
        let evaluation = Evaluation::new(Arc::new(|_: &[f64]| 0.0));
        let executor = Box::new(SerialExecutor::new(evaluation));
        let mut engine =
            Engine::new(algorithm, EngineConfig::default(), executor).unwrap();
        assert!(matches!(engine.optimize(0), Err(Error::User(_))));
    }

    #[test]
    fn test_global_best_queue_respects_capacity_and_order() {
        let config = EngineConfig::default()
            .with_max_iteration(30)
            .with_n_record_best_individuals(5)
            .with_seed(3);
        let mut engine = sphere_engine(config);
        engine.optimize(0).unwrap();
        let queue = engine.global_best();
        assert!(queue.len() <= 5);
        let fits: Vec<f64> = queue
            .items()
            .iter()
            .map(|i| i.minimized_fitness().unwrap())
            .collect();
        for pair in fits.windows(2) {
            assert!(pair[0] <= pair[1], "queue must be ordered best-first");
        }
    }

    #[test]
    fn test_checkpoint_on_improvement_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default()
            .with_max_iteration(10)
            .with_cp_interval(-1)
            .with_cp_location(dir.path(), "walk.cp")
            .with_cp_overwrite(true)
            .with_cp_ser_mode(SerializationMode::Binary)
            .with_seed(42);
        let mut engine = sphere_engine(config.clone());
        engine.optimize(0).unwrap();

        let path = dir.path().join("walk.cp");
        assert!(path.exists(), "improvement checkpoints must be written");

        let snapshot: EngineSnapshot<RandomWalk> =
            super::super::checkpoint::read_checkpoint(&path, SerializationMode::Binary).unwrap();
        assert_eq!(snapshot.iteration, 10);

        // Resume and run ten more iterations.
        let evaluation =
            Evaluation::new(Arc::new(|p: &[f64]| p.iter().map(|x| x * x).sum::<f64>()));
        let mut resumed = Engine::from_snapshot(
            snapshot,
            Box::new(SerialExecutor::new(evaluation)),
        );
        resumed.config.max_iteration = 20;
        let summary = resumed.optimize(10).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::MaxIterations);
        assert_eq!(summary.iterations, 10);
    }

    #[test]
    fn test_versioned_checkpoints_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default()
            .with_max_iteration(6)
            .with_cp_interval(2)
            .with_cp_location(dir.path(), "walk.cp")
            .with_cp_overwrite(false)
            .with_seed(42);
        let mut engine = sphere_engine(config);
        engine.optimize(0).unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(files.len() >= 2, "expected several checkpoints, got {files:?}");
        assert!(
            files.iter().any(|f| f.starts_with("final_")),
            "a final checkpoint must exist: {files:?}"
        );
    }

    #[test]
    fn test_monitors_receive_broadcasts() {
        use std::sync::atomic::AtomicUsize;

        #[derive(Default)]
        struct Counting {
            starts: Arc<AtomicUsize>,
            iterations: Arc<AtomicUsize>,
            ends: Arc<AtomicUsize>,
        }
        impl Monitor for Counting {
            fn on_run_start(&mut self, _s: &RunStatus) {
                self.starts.fetch_add(1, Ordering::SeqCst);
            }
            fn on_iteration(&mut self, _s: &RunStatus) {
                self.iterations.fetch_add(1, Ordering::SeqCst);
            }
            fn on_run_end(&mut self, _s: &RunStatus) {
                self.ends.fetch_add(1, Ordering::SeqCst);
            }
        }

        let starts = Arc::new(AtomicUsize::new(0));
        let iterations = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));

        let config = EngineConfig::default()
            .with_max_iteration(10)
            .with_report_iteration(2)
            .with_seed(42);
        let mut engine = sphere_engine(config);
        engine.register_monitor(Box::new(Counting {
            starts: starts.clone(),
            iterations: iterations.clone(),
            ends: ends.clone(),
        }));
        engine.optimize(0).unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(iterations.load(Ordering::SeqCst), 5);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_personalities_cleared_after_run() {
        let config = EngineConfig::default().with_max_iteration(3).with_seed(1);
        let mut engine = sphere_engine(config);
        engine.optimize(0).unwrap();
        for ind in engine.algorithm().population() {
            assert_eq!(*ind.personality(), crate::individual::Personality::None);
        }
    }

    #[test]
    fn test_broadcasts_reach_individuals() {
        let config = EngineConfig::default()
            .with_max_iteration(4)
            .with_seed(11);
        let mut engine = sphere_engine(config);
        engine.optimize(0).unwrap();
        for ind in engine.algorithm().population() {
            assert!(ind.best_known().is_some());
            assert_eq!(ind.assigned_iteration(), 3);
        }
    }
}
