//! The candidate-solution type and its evaluation lifecycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::random::Prng;

use super::params::{Adaptor, Parameters};
use super::personality::Personality;
use super::policy::{sigmoid, Direction, EvalPolicy, FitnessPair};
use super::types::{Constraint, EvalContext, Objective};

/// Validity level recorded when the user's evaluation marks a solution
/// invalid. Stands in for an infinite degree of infeasibility while
/// keeping every serialization encoding happy.
pub const MARKED_INVALID_VALIDITY: f64 = f64::MAX;

/// Freshness of an individual's cached fitness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Freshness {
    /// The transformed fitness matches the current parameters.
    Clean,
    /// Parameters changed since the last evaluation.
    #[default]
    Dirty,
    /// Evaluation ran, but the transformed value awaits the
    /// iteration-wide worst-known-valid fitness.
    Delayed,
}

/// A boolean that can only be written while its lock is open.
///
/// The invalid-by-user mark is unlocked at evaluation start and sealed
/// again at completion, so user code cannot flip it from outside an
/// evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LockedFlag {
    value: bool,
    locked: bool,
}

impl LockedFlag {
    fn new() -> Self {
        LockedFlag {
            value: false,
            locked: true,
        }
    }

    fn unlock_with(&mut self, value: bool) {
        self.value = value;
        self.locked = false;
    }

    fn set(&mut self, value: bool) {
        debug_assert!(!self.locked, "invalid-mark written outside an evaluation");
        if !self.locked {
            self.value = value;
        }
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn get(&self) -> bool {
        self.value
    }
}

/// One candidate solution.
///
/// An individual owns its parameter vector, the `(raw, transformed)`
/// fitness pair per criterion, and the evaluation-policy bundle that
/// travels with it over the wire so remote workers transform fitness
/// exactly like the engine would.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    params: Parameters,
    adaptor: Adaptor,
    fitness: Vec<FitnessPair>,
    freshness: Freshness,
    validity_level: f64,
    worst_known_valid: Vec<FitnessPair>,
    personality: Personality,
    evaluation_id: String,
    n_adaptions: u64,
    n_stalls: u64,
    assigned_iteration: u32,
    marked_invalid: LockedFlag,
    processing_failed: bool,
    best_known: Option<FitnessPair>,
    policy: EvalPolicy,
    direction: Direction,
    steepness: f64,
    barrier: f64,
    max_unsuccessful_adaptions: usize,
}

impl Individual {
    /// Creates a dirty individual with a single fitness criterion.
    pub fn new(params: Parameters, adaptor: Adaptor) -> Self {
        let direction = Direction::default();
        Individual {
            params,
            adaptor,
            fitness: vec![FitnessPair::worst(direction)],
            freshness: Freshness::Dirty,
            validity_level: 0.0,
            worst_known_valid: vec![FitnessPair::best(direction)],
            personality: Personality::None,
            evaluation_id: String::new(),
            n_adaptions: 0,
            n_stalls: 0,
            assigned_iteration: 0,
            marked_invalid: LockedFlag::new(),
            processing_failed: false,
            best_known: None,
            policy: EvalPolicy::default(),
            direction,
            steepness: 1.0,
            barrier: 1.0,
            max_unsuccessful_adaptions: 10,
        }
    }

    // ------------------------------------------------------------------
    // Policy bundle
    // ------------------------------------------------------------------

    /// Sets the evaluation policy.
    pub fn set_eval_policy(&mut self, policy: EvalPolicy) {
        self.policy = policy;
    }

    /// The evaluation policy in effect.
    pub fn eval_policy(&self) -> EvalPolicy {
        self.policy
    }

    /// Sets the optimization direction.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// The optimization direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Sets the sigmoid steepness. Must be positive.
    pub fn set_steepness(&mut self, steepness: f64) -> Result<(), Error> {
        if steepness <= 0.0 {
            return Err(Error::User(format!(
                "steepness must be positive, got {steepness}"
            )));
        }
        self.steepness = steepness;
        Ok(())
    }

    /// Sets the sigmoid barrier. Must be positive.
    pub fn set_barrier(&mut self, barrier: f64) -> Result<(), Error> {
        if barrier <= 0.0 {
            return Err(Error::User(format!(
                "barrier must be positive, got {barrier}"
            )));
        }
        self.barrier = barrier;
        Ok(())
    }

    /// Caps the retry loop inside [`adapt`](Self::adapt). Zero removes
    /// the cap.
    pub fn set_max_unsuccessful_adaptions(&mut self, max: usize) {
        self.max_unsuccessful_adaptions = max;
    }

    // ------------------------------------------------------------------
    // Parameters & adaption
    // ------------------------------------------------------------------

    /// The parameter vector.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Mutable parameter access. Marks the individual dirty.
    pub fn params_mut(&mut self) -> &mut Parameters {
        self.freshness = Freshness::Dirty;
        &mut self.params
    }

    /// The adaptor in use.
    pub fn adaptor(&self) -> &Adaptor {
        &self.adaptor
    }

    /// Mutable adaptor access (e.g. for stall-triggered step widening).
    pub fn adaptor_mut(&mut self) -> &mut Adaptor {
        &mut self.adaptor
    }

    /// Adapts the parameters, retrying until at least one dimension
    /// changes or the unsuccessful-adaption cap is hit.
    ///
    /// Returns the number of dimensions changed (possibly 0 when the
    /// cap struck first). The individual is dirty afterwards either way.
    pub fn adapt(&mut self, rng: &mut Prng) -> usize {
        let mut attempts = 0usize;
        let changed = loop {
            let changed = self.adaptor.adapt(&mut self.params, rng);
            attempts += 1;
            if changed > 0 {
                break changed;
            }
            if self.max_unsuccessful_adaptions > 0 && attempts >= self.max_unsuccessful_adaptions {
                break 0;
            }
        };
        self.n_adaptions += 1;
        self.freshness = Freshness::Dirty;
        changed
    }

    /// Best-effort retry loop: adapt until the constraint is satisfied
    /// or `max_retries` attempts are exhausted. Returns whether a valid
    /// candidate was obtained.
    pub fn adapt_until_valid(
        &mut self,
        rng: &mut Prng,
        constraint: &dyn Constraint,
        max_retries: usize,
    ) -> bool {
        for _ in 0..max_retries {
            self.adapt(rng);
            if constraint.validity_level(self.params.values()) <= 1.0 {
                return true;
            }
        }
        false
    }

    /// Uniformly re-randomizes the parameters within their bounds.
    pub fn randomize(&mut self, rng: &mut Prng) {
        self.params.randomize(rng);
        self.freshness = Freshness::Dirty;
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluates the individual under its policy bundle.
    ///
    /// Leaves the individual `Clean`, or `Delayed` when the policy is
    /// [`EvalPolicy::WorstKnownValidForInvalid`] and the candidate
    /// violates the constraint.
    pub fn evaluate(&mut self, objective: &dyn Objective, constraint: Option<&dyn Constraint>) {
        self.evaluation_id = format!("eval_{}", Uuid::new_v4());
        self.processing_failed = false;
        self.marked_invalid.unlock_with(false);

        let n = objective.n_criteria().max(1);
        self.resize_criteria(n);

        self.validity_level = constraint
            .map(|c| c.validity_level(self.params.values()))
            .unwrap_or(0.0);
        let fulfills_constraints = self.validity_level <= 1.0;

        if fulfills_constraints || self.policy == EvalPolicy::Simple {
            let mut ctx = EvalContext::new(n);
            let primary = objective.evaluate(self.params.values(), &mut ctx);
            if ctx.marked_invalid() {
                self.marked_invalid.set(true);
                self.validity_level = MARKED_INVALID_VALIDITY;
            }
            self.marked_invalid.lock();

            let worst = self.direction.worst_case();
            let mut raws = Vec::with_capacity(n);
            raws.push(primary);
            for id in 1..n {
                raws.push(ctx.secondary(id).unwrap_or(worst));
            }

            if self.marked_invalid.get() || raws.iter().all(|&r| r == worst) {
                // Flat worst-quality surface for solutions the user
                // rejected after the fact.
                for pair in self.fitness.iter_mut() {
                    *pair = FitnessPair::worst(self.direction);
                }
            } else {
                for (pair, raw) in self.fitness.iter_mut().zip(raws) {
                    pair.raw = raw;
                    pair.transformed = if self.policy == EvalPolicy::Sigmoid {
                        sigmoid(raw, self.barrier, self.steepness)
                    } else {
                        raw
                    };
                }
            }
            self.freshness = Freshness::Clean;
        } else {
            self.marked_invalid.lock();
            match self.policy {
                EvalPolicy::WorstCaseForInvalid => {
                    for pair in self.fitness.iter_mut() {
                        *pair = FitnessPair::worst(self.direction);
                    }
                    self.freshness = Freshness::Clean;
                }
                EvalPolicy::Sigmoid => {
                    // Saturate instead of overflowing to infinity, which
                    // no text encoding can round-trip.
                    let penalty = (self.direction.penalty_sign()
                        * self.validity_level
                        * self.barrier)
                        .clamp(f64::MIN, f64::MAX);
                    for pair in self.fitness.iter_mut() {
                        pair.raw = self.direction.worst_case();
                        pair.transformed = penalty;
                    }
                    self.freshness = Freshness::Clean;
                }
                EvalPolicy::WorstKnownValidForInvalid => {
                    // Place-holders only; the transformed side is
                    // finalized by apply_worst_known_valid().
                    for pair in self.fitness.iter_mut() {
                        *pair = FitnessPair::worst(self.direction);
                    }
                    self.freshness = Freshness::Delayed;
                }
                EvalPolicy::Simple => unreachable!("simple policy evaluates unconditionally"),
            }
        }
    }

    /// Stores the iteration-wide worst-known-valid snapshot and
    /// finalizes a `Delayed` evaluation.
    pub fn apply_worst_known_valid(&mut self, worst_known: &[FitnessPair]) {
        self.worst_known_valid = worst_known.to_vec();
        if self.policy == EvalPolicy::WorstKnownValidForInvalid
            && self.freshness == Freshness::Delayed
        {
            let scale = self.barrier.max(1.0);
            for (i, pair) in self.fitness.iter_mut().enumerate() {
                let w_known = worst_known
                    .get(i)
                    .map(|p| p.transformed)
                    .unwrap_or_else(|| self.direction.worst_case());
                pair.transformed = (self.direction.penalty_sign()
                    * w_known.max(scale)
                    * self.validity_level)
                    .clamp(f64::MIN, f64::MAX);
            }
            self.freshness = Freshness::Clean;
        }
    }

    fn resize_criteria(&mut self, n: usize) {
        if self.fitness.len() != n {
            self.fitness.resize(n, FitnessPair::worst(self.direction));
            self.worst_known_valid
                .resize(n, FitnessPair::best(self.direction));
        }
    }

    // ------------------------------------------------------------------
    // Fitness access
    // ------------------------------------------------------------------

    /// Number of fitness criteria currently held.
    pub fn n_criteria(&self) -> usize {
        self.fitness.len()
    }

    /// The transformed primary fitness. Fails unless the individual is
    /// `Clean`.
    pub fn transformed_fitness(&self) -> Result<f64, Error> {
        self.transformed_fitness_of(0)
    }

    /// The transformed fitness of criterion `i`. Fails unless `Clean`.
    pub fn transformed_fitness_of(&self, i: usize) -> Result<f64, Error> {
        if self.freshness != Freshness::Clean {
            return Err(Error::DirtyFitnessAccess);
        }
        self.fitness
            .get(i)
            .map(|p| p.transformed)
            .ok_or_else(|| Error::User(format!("no fitness criterion {i}")))
    }

    /// The raw primary fitness. Fails unless the individual is `Clean`.
    pub fn raw_fitness(&self) -> Result<f64, Error> {
        self.raw_fitness_of(0)
    }

    /// The raw fitness of criterion `i`. Fails unless `Clean`.
    pub fn raw_fitness_of(&self, i: usize) -> Result<f64, Error> {
        if self.freshness != Freshness::Clean {
            return Err(Error::DirtyFitnessAccess);
        }
        self.fitness
            .get(i)
            .map(|p| p.raw)
            .ok_or_else(|| Error::User(format!("no fitness criterion {i}")))
    }

    /// The cached fitness pair of criterion `i`, regardless of
    /// freshness. The value may be stale.
    pub fn cached_fitness(&self, i: usize) -> Option<FitnessPair> {
        self.fitness.get(i).copied()
    }

    /// The transformed primary fitness mapped onto the internal
    /// smaller-is-better axis (negated in maximization mode).
    pub fn minimized_fitness(&self) -> Result<f64, Error> {
        Ok(self.direction.minimized(self.transformed_fitness()?))
    }

    /// Sum of transformed criteria.
    pub fn sum_combiner(&self) -> Result<f64, Error> {
        self.combine(|t| t)
    }

    /// Sum of absolute transformed criteria.
    pub fn fabs_sum_combiner(&self) -> Result<f64, Error> {
        self.combine(f64::abs)
    }

    /// Sum of squared transformed criteria.
    pub fn squared_sum_combiner(&self) -> Result<f64, Error> {
        self.combine(|t| t * t)
    }

    fn combine(&self, f: impl Fn(f64) -> f64) -> Result<f64, Error> {
        if self.freshness != Freshness::Clean {
            return Err(Error::DirtyFitnessAccess);
        }
        Ok(self.fitness.iter().map(|p| f(p.transformed)).sum())
    }

    // ------------------------------------------------------------------
    // State queries & bookkeeping
    // ------------------------------------------------------------------

    /// Current freshness.
    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// Whether the cached fitness matches the current parameters.
    pub fn is_clean(&self) -> bool {
        self.freshness == Freshness::Clean
    }

    /// Whether evaluation is pending cross-population information.
    pub fn is_delayed(&self) -> bool {
        self.freshness == Freshness::Delayed
    }

    /// Degree of constraint violation; `v <= 1` means valid.
    pub fn validity_level(&self) -> f64 {
        self.validity_level
    }

    /// Whether the candidate respects its constraints and was not marked
    /// invalid by the user.
    pub fn is_valid(&self) -> bool {
        self.validity_level <= 1.0 && !self.marked_invalid.get()
    }

    /// Whether the user's evaluation marked this solution invalid.
    pub fn marked_invalid_by_user(&self) -> bool {
        self.marked_invalid.get()
    }

    /// The id assigned at the start of the most recent evaluation.
    pub fn evaluation_id(&self) -> &str {
        &self.evaluation_id
    }

    /// Total number of adaptions performed.
    pub fn n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    /// Stall count last broadcast by the surrounding algorithm.
    pub fn stall_count(&self) -> u64 {
        self.n_stalls
    }

    /// Broadcast hook: stores the surrounding algorithm's stall count.
    pub fn set_stall_count(&mut self, stalls: u64) {
        self.n_stalls = stalls;
    }

    /// Iteration this individual was last touched in.
    pub fn assigned_iteration(&self) -> u32 {
        self.assigned_iteration
    }

    /// Marks the individual with the current iteration number.
    pub fn set_assigned_iteration(&mut self, iteration: u32) {
        self.assigned_iteration = iteration;
    }

    /// Broadcast hook: stores the run-wide best primary fitness.
    pub fn set_best_known(&mut self, best: FitnessPair) {
        self.best_known = Some(best);
    }

    /// The run-wide best primary fitness last broadcast, if any.
    pub fn best_known(&self) -> Option<FitnessPair> {
        self.best_known
    }

    /// Whether an executor failed to process this individual.
    pub fn processing_failed(&self) -> bool {
        self.processing_failed
    }

    /// Marks the individual as failed during executor processing.
    pub fn mark_processing_failed(&mut self) {
        self.processing_failed = true;
    }

    /// The attached personality record.
    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    /// Mutable access to the personality record.
    pub fn personality_mut(&mut self) -> &mut Personality {
        &mut self.personality
    }

    /// Attaches a personality record.
    pub fn set_personality(&mut self, personality: Personality) {
        self.personality = personality;
    }

    /// Removes the personality record (algorithm exit).
    pub fn clear_personality(&mut self) {
        self.personality = Personality::None;
    }
}
