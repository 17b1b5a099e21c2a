//! The evolutionary algorithm variant.

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::population::{repair_after_submission, update_worst_known_valid};
use crate::engine::{Algorithm, Cycle};
use crate::error::Error;
use crate::individual::{EaPersonality, FitnessPair, Individual, Personality};
use crate::random::{fork_rng, Prng};

use super::config::{EaConfig, RecombinationMethod, SortingMode};
use super::selection;

/// μ parents followed by ν children, evolved under one of five
/// selection schemes.
///
/// Seed the population with at least one individual before handing the
/// algorithm to the engine; fillers are cloned and randomized from it.
#[derive(Clone, Serialize, Deserialize)]
pub struct EvolutionaryAlgorithm {
    config: EaConfig,
    population: Vec<Individual>,
}

impl EvolutionaryAlgorithm {
    /// Creates the algorithm.
    ///
    /// Fails on an invalid configuration.
    pub fn new(config: EaConfig) -> Result<Self, Error> {
        config.validate().map_err(Error::User)?;
        Ok(EvolutionaryAlgorithm {
            config,
            population: Vec::new(),
        })
    }

    /// Seeds the population with a starting individual.
    pub fn push(&mut self, individual: Individual) {
        self.population.push(individual);
    }

    /// The configuration.
    pub fn config(&self) -> &EaConfig {
        &self.config
    }

    fn mu(&self) -> usize {
        self.config.n_parents
    }

    /// Adds children while growth is configured and headroom remains.
    fn grow(&mut self) {
        if self.config.growth_rate == 0 {
            return;
        }
        let headroom = self
            .config
            .max_population_size
            .saturating_sub(self.population.len());
        let added = self.config.growth_rate.min(headroom);
        if added == 0 {
            return;
        }
        let template = self.population[0].clone();
        for _ in 0..added {
            self.population.push(template.clone());
        }
        debug!(added, size = self.population.len(), "population grown");
    }

    /// Copies parent content into every child slot.
    fn recombine(&mut self, rng: &mut Prng) {
        let mu = self.mu();
        let parents_evaluated = self.population[..mu].iter().all(Individual::is_clean);
        for child_idx in mu..self.population.len() {
            let parent_idx = match self.config.recombination_method {
                RecombinationMethod::Random => rng.random_range(0..mu),
                RecombinationMethod::Default | RecombinationMethod::ValueWeighted => {
                    // Without known parent fitnesses (first iteration)
                    // the weighted draw degenerates to random.
                    if parents_evaluated {
                        selection::value_weighted_parent(mu, rng)
                    } else {
                        rng.random_range(0..mu)
                    }
                }
            };
            let values = self.population[parent_idx].params().values().to_vec();
            let adaptor = self.population[parent_idx].adaptor().clone();
            let child = &mut self.population[child_idx];
            child.params_mut().set_values(&values);
            *child.adaptor_mut() = adaptor;
            child.set_personality(Personality::Ea(EaPersonality {
                is_parent: false,
                parent_id: Some(parent_idx),
                on_pareto_front: false,
            }));
        }
    }

    /// Adapts every child, optionally on the data-parallel pool.
    ///
    /// Each child gets a stream forked from the master RNG up front, so
    /// results do not depend on the thread count.
    fn adapt_children(&mut self, rng: &mut Prng) {
        let mu = self.mu();
        let children = &mut self.population[mu..];
        let mut streams: Vec<Prng> = (0..children.len()).map(|_| fork_rng(rng)).collect();
        if self.config.n_adaption_threads > 1 {
            children
                .par_iter_mut()
                .zip(streams.par_iter_mut())
                .for_each(|(child, stream)| {
                    child.adapt(stream);
                });
        } else {
            for (child, stream) in children.iter_mut().zip(streams.iter_mut()) {
                child.adapt(stream);
            }
        }
    }

    fn select(&mut self, iteration_zero: bool, rng: &mut Prng) {
        let mu = self.mu();
        match self.config.sorting_method {
            SortingMode::MuPlusNu => selection::sort_mu_plus_nu(&mut self.population),
            SortingMode::MuCommaNu => {
                if iteration_zero {
                    selection::sort_mu_plus_nu(&mut self.population);
                } else {
                    selection::sort_mu_comma_nu(&mut self.population, mu);
                }
            }
            SortingMode::MuNu1Pretain => {
                if iteration_zero {
                    selection::sort_mu_plus_nu(&mut self.population);
                } else {
                    selection::sort_mu_nu_1_pretain(&mut self.population, mu);
                }
            }
            SortingMode::MuPlusNuPareto => {
                selection::sort_pareto(&mut self.population, mu, 0, rng);
            }
            SortingMode::MuCommaNuPareto => {
                if iteration_zero {
                    selection::sort_pareto(&mut self.population, mu, 0, rng);
                } else {
                    selection::sort_pareto(&mut self.population, mu, mu, rng);
                }
            }
        }
        for (idx, individual) in self.population.iter_mut().enumerate() {
            if let Some(p) = individual.personality_mut().ea_mut() {
                p.is_parent = idx < mu;
            }
        }
    }
}

impl Algorithm for EvolutionaryAlgorithm {
    fn name(&self) -> &'static str {
        "evolutionary"
    }

    fn population(&self) -> &[Individual] {
        &self.population
    }

    fn population_mut(&mut self) -> &mut Vec<Individual> {
        &mut self.population
    }

    fn default_population_size(&self) -> usize {
        self.config.size
    }

    fn assign_personalities(&mut self) {
        let mu = self.mu();
        for (idx, individual) in self.population.iter_mut().enumerate() {
            individual.set_personality(Personality::Ea(EaPersonality {
                is_parent: idx < mu,
                parent_id: None,
                on_pareto_front: false,
            }));
        }
    }

    fn cycle_logic(&mut self, cycle: &mut Cycle<'_>) -> Result<FitnessPair, Error> {
        let iteration_zero = self.population.iter().all(|i| !i.is_clean());

        self.grow();
        self.recombine(cycle.rng);
        self.adapt_children(cycle.rng);

        // Children are always evaluated; parents only while they carry
        // no current fitness (first iteration, resumed runs).
        let mask: Vec<bool> = self.population.iter().map(|i| !i.is_clean()).collect();
        let mut unprocessed = Vec::new();
        cycle.executor.work_on(
            &mut self.population,
            &mask,
            &mut unprocessed,
            cycle.resubmit_unprocessed,
            cycle.iteration,
        )?;
        if !unprocessed.is_empty() {
            debug!(count = unprocessed.len(), "children lost in submission");
        }

        update_worst_known_valid(&mut self.population, cycle.direction);
        let nominal = self.population.len();
        repair_after_submission(&mut self.population, nominal)?;

        self.select(iteration_zero, cycle.rng);

        let best = &self.population[0];
        Ok(FitnessPair {
            raw: best.raw_fitness()?,
            transformed: best.transformed_fitness()?,
        })
    }

    fn act_on_stalls(&mut self, _rng: &mut Prng) {
        // Widen the search when the run stalls.
        for individual in self.population.iter_mut() {
            individual.adaptor_mut().scale_step(1.5);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig, HaltReason};
    use crate::executor::{Evaluation, PooledExecutor, SerialExecutor};
    use crate::individual::{Adaptor, Parameters};
    use crate::pool::ThreadPool;
    use std::sync::Arc;

    fn sphere_seed(dim: usize) -> Individual {
        let mut params = Parameters::uniform_bounds(dim, -5.0, 5.0).unwrap();
        params.set_values(&vec![4.0; dim]);
        Individual::new(
            params,
            Adaptor::SelfAdaptiveGaussian {
                sigma: 0.5,
                sigma_adaption: 0.25,
                probability: 1.0,
            },
        )
    }

    fn sphere_evaluation() -> Evaluation {
        Evaluation::new(Arc::new(|p: &[f64]| p.iter().map(|x| x * x).sum::<f64>()))
    }

    fn sphere_ea(ea_config: EaConfig, engine_config: EngineConfig) -> Engine<EvolutionaryAlgorithm> {
        let mut algorithm = EvolutionaryAlgorithm::new(ea_config).unwrap();
        algorithm.push(sphere_seed(5));
        Engine::new(
            algorithm,
            engine_config,
            Box::new(SerialExecutor::new(sphere_evaluation())),
        )
        .unwrap()
    }

    #[test]
    fn test_trivial_ea_converges_on_sphere() {
        // 4 parents + 12 children, minimization, MU_PLUS_NU.
        let ea_config = EaConfig::default().with_sizes(16, 4);
        let engine_config = EngineConfig::default()
            .with_max_iteration(200)
            .with_seed(42);
        let mut engine = sphere_ea(ea_config, engine_config);
        let summary = engine.optimize(0).unwrap();

        assert!(
            summary.best_raw < 1e-4,
            "sphere should reach 1e-4 within 200 iterations, got {}",
            summary.best_raw
        );
        // Elitist plus-selection: the best fitness never worsens.
        for window in summary.fitness_history.windows(2) {
            assert!(window[1] <= window[0] + 1e-12);
        }
    }

    #[test]
    fn test_halt_on_quality_threshold() {
        let ea_config = EaConfig::default().with_sizes(16, 4);
        let engine_config = EngineConfig::default()
            .with_max_iteration(200)
            .with_threshold(1e-3)
            .with_seed(42);
        let mut engine = sphere_ea(ea_config, engine_config);
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::QualityThreshold);
        assert!(summary.iterations < 200);
    }

    #[test]
    fn test_stall_halt_on_constant_fitness() {
        let mut algorithm = EvolutionaryAlgorithm::new(EaConfig::default().with_sizes(4, 2)).unwrap();
        algorithm.push(sphere_seed(2));
        let evaluation = Evaluation::new(Arc::new(|_: &[f64]| 1.0));
        let engine_config = EngineConfig::default()
            .with_max_iteration(0)
            .with_max_stall_iteration(8)
            .with_seed(42);
        let mut engine = Engine::new(
            algorithm,
            engine_config,
            Box::new(SerialExecutor::new(evaluation)),
        )
        .unwrap();
        let summary = engine.optimize(0).unwrap();
        assert_eq!(summary.halt_reason, HaltReason::StallLimit);
    }

    #[test]
    fn test_comma_selection_promotes_only_fresh_children() {
        let ea_config = EaConfig::default()
            .with_sizes(12, 3)
            .with_sorting_method(SortingMode::MuCommaNu);
        let engine_config = EngineConfig::default()
            .with_max_iteration(5)
            .with_seed(42);
        let mut engine = sphere_ea(ea_config, engine_config);
        engine.optimize(0).unwrap();

        // Every parent slot must hold an individual from the last
        // iteration (comma never carries the old generation over).
        for parent in &engine.algorithm().population()[..3] {
            assert_eq!(parent.assigned_iteration(), 4);
        }
    }

    #[test]
    fn test_maximization_mode() {
        // Maximize -(x²): optimum 0 at the origin.
        let evaluation = Evaluation::new(Arc::new(|p: &[f64]| -p.iter().map(|x| x * x).sum::<f64>()));
        let mut algorithm = EvolutionaryAlgorithm::new(EaConfig::default().with_sizes(16, 4)).unwrap();
        algorithm.push(sphere_seed(3));
        let engine_config = EngineConfig::default()
            .with_max_iteration(150)
            .with_maximize(true)
            .with_seed(42);
        let mut engine = Engine::new(
            algorithm,
            engine_config,
            Box::new(SerialExecutor::new(evaluation)),
        )
        .unwrap();
        let summary = engine.optimize(0).unwrap();
        assert!(
            summary.best_raw > -1e-2,
            "maximization should push towards 0, got {}",
            summary.best_raw
        );
    }

    #[test]
    fn test_pooled_execution_matches_contract() {
        let ea_config = EaConfig::default().with_sizes(16, 4);
        let mut algorithm = EvolutionaryAlgorithm::new(ea_config).unwrap();
        algorithm.push(sphere_seed(4));
        let pool = Arc::new(ThreadPool::new(4));
        let engine_config = EngineConfig::default()
            .with_max_iteration(60)
            .with_seed(42);
        let mut engine = Engine::new(
            algorithm,
            engine_config,
            Box::new(PooledExecutor::new(sphere_evaluation(), pool)),
        )
        .unwrap();
        let summary = engine.optimize(0).unwrap();
        assert!(summary.best_raw < 1.0, "got {}", summary.best_raw);
    }

    #[test]
    fn test_growth_expands_population_to_cap() {
        let ea_config = EaConfig::default().with_sizes(8, 2).with_growth(2, 14);
        let engine_config = EngineConfig::default()
            .with_max_iteration(10)
            .with_seed(42);
        let mut engine = sphere_ea(ea_config, engine_config);
        engine.optimize(0).unwrap();
        assert_eq!(engine.algorithm().population().len(), 14);
    }

    #[test]
    fn test_parallel_adaption_is_deterministic() {
        let run = |threads: usize| {
            let ea_config = EaConfig::default()
                .with_sizes(12, 3)
                .with_n_adaption_threads(threads);
            let engine_config = EngineConfig::default()
                .with_max_iteration(30)
                .with_seed(7);
            let mut engine = sphere_ea(ea_config, engine_config);
            engine.optimize(0).unwrap().best_raw
        };
        // Child streams are forked up front, so thread count does not
        // change the outcome.
        assert_eq!(run(1).to_bits(), run(4).to_bits());
    }

    #[test]
    fn test_pareto_selection_runs_multi_criterion() {
        use crate::individual::{EvalContext, Objective};

        struct TradeOff;
        impl Objective for TradeOff {
            fn n_criteria(&self) -> usize {
                2
            }
            fn evaluate(&self, params: &[f64], ctx: &mut EvalContext) -> f64 {
                let a: f64 = params.iter().map(|x| x * x).sum();
                let b: f64 = params.iter().map(|x| (x - 2.0) * (x - 2.0)).sum();
                ctx.register_secondary(1, b);
                a
            }
        }

        let ea_config = EaConfig::default()
            .with_sizes(12, 4)
            .with_sorting_method(SortingMode::MuPlusNuPareto);
        let mut algorithm = EvolutionaryAlgorithm::new(ea_config).unwrap();
        algorithm.push(sphere_seed(2));
        let engine_config = EngineConfig::default()
            .with_max_iteration(20)
            .with_seed(42);
        let mut engine = Engine::new(
            algorithm,
            engine_config,
            Box::new(SerialExecutor::new(Evaluation::new(Arc::new(TradeOff)))),
        )
        .unwrap();
        let summary = engine.optimize(0).unwrap();
        assert!(summary.best_raw.is_finite());
    }
}
