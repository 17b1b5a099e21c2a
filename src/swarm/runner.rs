//! The particle-swarm variant.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::population::{repair_after_submission, update_worst_known_valid};
use crate::engine::{Algorithm, Cycle};
use crate::error::Error;
use crate::individual::{
    Direction, FitnessPair, Individual, PersonalBest, Personality, SwarmPersonality,
};
use crate::random::Prng;

use super::config::{SwarmConfig, UpdateRule};

/// Clamps a velocity vector to `±pct × (upper − lower)` per dimension.
///
/// If any component exceeds its cap, the whole vector is scaled
/// uniformly so that no component overflows.
pub fn clamp_velocity(velocity: &mut [f64], lower: &[f64], upper: &[f64], pct: f64) {
    let mut scale = 1.0f64;
    for (d, v) in velocity.iter().enumerate() {
        let cap = pct * (upper[d] - lower[d]);
        if v.abs() > cap && cap > 0.0 {
            scale = scale.min(cap / v.abs());
        } else if cap == 0.0 {
            scale = 0.0;
        }
    }
    if scale < 1.0 {
        for v in velocity.iter_mut() {
            *v *= scale;
        }
    }
}

/// Particles partitioned into fixed-size neighborhoods, moved by
/// velocity updates towards personal, neighborhood, and global bests.
#[derive(Clone, Serialize, Deserialize)]
pub struct SwarmAlgorithm {
    config: SwarmConfig,
    population: Vec<Individual>,
    neighborhood_bests: Vec<Option<PersonalBest>>,
    global_best: Option<PersonalBest>,
}

impl SwarmAlgorithm {
    /// Creates the algorithm.
    pub fn new(config: SwarmConfig) -> Result<Self, Error> {
        config.validate().map_err(Error::User)?;
        let neighborhoods = config.n_neighborhoods;
        Ok(SwarmAlgorithm {
            config,
            population: Vec::new(),
            neighborhood_bests: vec![None; neighborhoods],
            global_best: None,
        })
    }

    /// Seeds the swarm with a starting particle.
    pub fn push(&mut self, individual: Individual) {
        self.population.push(individual);
    }

    /// The configuration.
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// The best position the swarm has seen, if any.
    pub fn global_best(&self) -> Option<&PersonalBest> {
        self.global_best.as_ref()
    }

    fn members(&self) -> usize {
        self.config.n_neighborhood_members
    }

    /// Moves one particle: new velocity, clamp, position update (or the
    /// repulsive inverse during a long stall).
    fn move_particle(&mut self, idx: usize, rng: &mut Prng, repulsive: bool) {
        // Surplus particles (a population seeded beyond the nominal
        // swarm size) fold into the last neighborhood.
        let neighborhood = (idx / self.members()).min(self.config.n_neighborhoods - 1);
        let (c_personal, c_neighborhood, c_global, c_velocity) = (
            self.config.c_personal,
            self.config.c_neighborhood,
            self.config.c_global,
            self.config.c_velocity,
        );
        let n_best = self.neighborhood_bests[neighborhood]
            .as_ref()
            .map(|b| b.values.clone());
        let g_best = self.global_best.as_ref().map(|b| b.values.clone());

        let particle = &mut self.population[idx];
        let position = particle.params().values().to_vec();
        let lower = particle.params().lower().to_vec();
        let upper = particle.params().upper().to_vec();
        let dim = position.len();

        let Some(personality) = particle.personality_mut().swarm_mut() else {
            return;
        };
        if personality.velocity.len() != dim {
            personality.velocity = vec![0.0; dim];
        }
        let p_best = personality
            .personal_best
            .as_ref()
            .map(|b| b.values.clone())
            .unwrap_or_else(|| position.clone());

        // Linear rule: one factor per attraction term. Classic rule:
        // one factor per dimension.
        let (rp, rn, rg) = (
            rng.random_range(0.0..1.0),
            rng.random_range(0.0..1.0),
            rng.random_range(0.0..1.0),
        );
        let mut velocity = vec![0.0; dim];
        for d in 0..dim {
            let (fp, fn_, fg) = match self.config.update_rule {
                UpdateRule::Linear => (rp, rn, rg),
                UpdateRule::Classic => (
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                ),
            };
            let mut v = c_velocity * personality.velocity[d];
            v += c_personal * fp * (p_best[d] - position[d]);
            if let Some(n_best) = &n_best {
                v += c_neighborhood * fn_ * (n_best[d] - position[d]);
            }
            if let Some(g_best) = &g_best {
                v += c_global * fg * (g_best[d] - position[d]);
            }
            velocity[d] = v;
        }
        clamp_velocity(
            &mut velocity,
            &lower,
            &upper,
            self.config.velocity_range_percentage,
        );
        personality.velocity = velocity.clone();

        let new_position: Vec<f64> = position
            .iter()
            .zip(&velocity)
            .map(|(x, v)| if repulsive { x - v } else { x + v })
            .collect();
        particle.params_mut().set_values(&new_position);
    }

    /// Refreshes personal, neighborhood, and global bests from the
    /// evaluated population, sorting each neighborhood best-first.
    fn update_bests(&mut self, direction: Direction) -> Result<FitnessPair, Error> {
        for particle in self.population.iter_mut() {
            let fitness = match particle.cached_fitness(0) {
                Some(pair) if particle.is_clean() => pair,
                _ => continue,
            };
            let minimized = direction.minimized(fitness.transformed);
            let values = particle.params().values().to_vec();
            if let Some(personality) = particle.personality_mut().swarm_mut() {
                let improved = personality
                    .personal_best
                    .as_ref()
                    .map(|b| minimized < direction.minimized(b.fitness.transformed))
                    .unwrap_or(true);
                if improved {
                    personality.personal_best = Some(PersonalBest { values, fitness });
                }
            }
        }

        let members = self.members();
        for n in 0..self.config.n_neighborhoods {
            let start = n * members;
            let end = (start + members).min(self.population.len());
            if start >= end {
                continue;
            }
            self.population[start..end].sort_by(|a, b| {
                let fa = a.minimized_fitness().unwrap_or(f64::MAX);
                let fb = b.minimized_fitness().unwrap_or(f64::MAX);
                fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
            });
            let leader = &self.population[start];
            if let (Ok(_), Some(pair)) = (leader.minimized_fitness(), leader.cached_fitness(0)) {
                let better = self.neighborhood_bests[n]
                    .as_ref()
                    .map(|b| direction.is_better(pair.transformed, b.fitness.transformed))
                    .unwrap_or(true);
                if better {
                    self.neighborhood_bests[n] = Some(PersonalBest {
                        values: leader.params().values().to_vec(),
                        fitness: pair,
                    });
                }
            }
        }

        let mut best_pair: Option<FitnessPair> = None;
        for candidate in self.neighborhood_bests.iter().flatten() {
            let better = self
                .global_best
                .as_ref()
                .map(|b| {
                    direction.is_better(candidate.fitness.transformed, b.fitness.transformed)
                })
                .unwrap_or(true);
            if better {
                self.global_best = Some(candidate.clone());
            }
        }
        if let Some(global) = &self.global_best {
            best_pair = Some(global.fitness);
        }

        // The iteration's best is the best current particle; the global
        // best may be older.
        let iteration_best = self
            .population
            .iter()
            .filter(|p| p.is_clean())
            .min_by(|a, b| {
                let fa = a.minimized_fitness().unwrap_or(f64::MAX);
                let fb = b.minimized_fitness().unwrap_or(f64::MAX);
                fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
            });
        match iteration_best {
            Some(best) => Ok(FitnessPair {
                raw: best.raw_fitness()?,
                transformed: best.transformed_fitness()?,
            }),
            None => best_pair.ok_or_else(|| {
                Error::Evaluation("swarm iteration produced no evaluated particle".to_string())
            }),
        }
    }
}

impl Algorithm for SwarmAlgorithm {
    fn name(&self) -> &'static str {
        "swarm"
    }

    fn population(&self) -> &[Individual] {
        &self.population
    }

    fn population_mut(&mut self) -> &mut Vec<Individual> {
        &mut self.population
    }

    fn default_population_size(&self) -> usize {
        self.config.swarm_size()
    }

    fn random_fill_up(&self) -> bool {
        self.config.random_fill_up
    }

    fn assign_personalities(&mut self) {
        let members = self.members();
        let last = self.config.n_neighborhoods - 1;
        for (idx, particle) in self.population.iter_mut().enumerate() {
            let dim = particle.params().dim();
            particle.set_personality(Personality::Swarm(SwarmPersonality {
                neighborhood: (idx / members).min(last),
                velocity: vec![0.0; dim],
                personal_best: None,
            }));
        }
    }

    fn cycle_logic(&mut self, cycle: &mut Cycle<'_>) -> Result<FitnessPair, Error> {
        // Positions only move once bests exist; the first cycle just
        // evaluates the initial swarm.
        if self.global_best.is_some() {
            let repulsive = self.config.repulsion_threshold > 0
                && self
                    .population
                    .first()
                    .map(|p| p.stall_count() >= self.config.repulsion_threshold)
                    .unwrap_or(false);
            if repulsive {
                debug!("repulsion phase: walking away from the known bests");
            }
            for idx in 0..self.population.len() {
                self.move_particle(idx, cycle.rng, repulsive);
            }
        }

        let mask: Vec<bool> = self.population.iter().map(|p| !p.is_clean()).collect();
        let mut unprocessed = Vec::new();
        cycle.executor.work_on(
            &mut self.population,
            &mask,
            &mut unprocessed,
            cycle.resubmit_unprocessed,
            cycle.iteration,
        )?;
        if !unprocessed.is_empty() {
            debug!(count = unprocessed.len(), "particles lost in submission");
        }

        update_worst_known_valid(&mut self.population, cycle.direction);
        let nominal = self.config.swarm_size();
        repair_after_submission(&mut self.population, nominal)?;

        self.update_bests(cycle.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig, HaltReason};
    use crate::executor::{Evaluation, SerialExecutor};
    use crate::individual::{Adaptor, Parameters};
    use std::sync::Arc;

    fn particle_seed(dim: usize) -> Individual {
        let mut params = Parameters::uniform_bounds(dim, -5.0, 5.0).unwrap();
        params.set_values(&vec![3.0; dim]);
        Individual::new(params, Adaptor::default())
    }

    fn sphere_swarm(
        swarm_config: SwarmConfig,
        engine_config: EngineConfig,
    ) -> Engine<SwarmAlgorithm> {
        let mut algorithm = SwarmAlgorithm::new(swarm_config).unwrap();
        algorithm.push(particle_seed(3));
        let evaluation =
            Evaluation::new(Arc::new(|p: &[f64]| p.iter().map(|x| x * x).sum::<f64>()));
        Engine::new(
            algorithm,
            engine_config,
            Box::new(SerialExecutor::new(evaluation)),
        )
        .unwrap()
    }

    #[test]
    fn test_clamp_scales_uniformly() {
        let lower = [-1.0, -1.0];
        let upper = [1.0, 1.0];
        // Caps are 0.5 per dimension; the larger component is 2.0, so
        // the whole vector shrinks by 0.25.
        let mut velocity = vec![2.0, 1.0];
        clamp_velocity(&mut velocity, &lower, &upper, 0.25);
        assert!((velocity[0] - 0.5).abs() < 1e-12);
        assert!((velocity[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_leaves_small_velocities_alone() {
        let lower = [-1.0];
        let upper = [1.0];
        let mut velocity = vec![0.1];
        clamp_velocity(&mut velocity, &lower, &upper, 0.25);
        assert_eq!(velocity, vec![0.1]);
    }

    #[test]
    fn test_swarm_converges_on_sphere() {
        let swarm_config = SwarmConfig::default()
            .with_neighborhoods(3, 5)
            .with_constants(1.5, 1.5, 0.5, 0.7);
        let engine_config = EngineConfig::default()
            .with_max_iteration(150)
            .with_seed(42);
        let mut engine = sphere_swarm(swarm_config, engine_config);
        let summary = engine.optimize(0).unwrap();
        assert!(
            summary.best_raw < 0.1,
            "swarm should approach the origin, got {}",
            summary.best_raw
        );
    }

    #[test]
    fn test_neighborhood_assignment() {
        let swarm_config = SwarmConfig::default().with_neighborhoods(2, 3);
        let engine_config = EngineConfig::default().with_max_iteration(2).with_seed(1);
        let mut engine = sphere_swarm(swarm_config, engine_config);
        engine.optimize(0).unwrap();
        // Personalities are stripped after the run; rerun manually to
        // inspect them mid-flight instead.
        let mut algorithm = SwarmAlgorithm::new(SwarmConfig::default().with_neighborhoods(2, 3))
            .unwrap();
        for _ in 0..6 {
            algorithm.push(particle_seed(2));
        }
        algorithm.assign_personalities();
        let ids: Vec<usize> = algorithm
            .population()
            .iter()
            .map(|p| p.personality().swarm().unwrap().neighborhood)
            .collect();
        assert_eq!(ids, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_personal_bests_recorded() {
        let swarm_config = SwarmConfig::default().with_neighborhoods(2, 4);
        let engine_config = EngineConfig::default().with_max_iteration(5).with_seed(3);

        let mut algorithm = SwarmAlgorithm::new(swarm_config).unwrap();
        algorithm.push(particle_seed(2));
        let evaluation =
            Evaluation::new(Arc::new(|p: &[f64]| p.iter().map(|x| x * x).sum::<f64>()));
        let mut engine = Engine::new(
            algorithm,
            engine_config,
            Box::new(SerialExecutor::new(evaluation)),
        )
        .unwrap();
        engine.optimize(0).unwrap();
        assert!(engine.algorithm().global_best().is_some());
    }

    #[test]
    fn test_repulsion_threshold_runs() {
        // Constant fitness: stalls accumulate and the repulsion branch
        // executes without derailing the run.
        let swarm_config = SwarmConfig::default()
            .with_neighborhoods(2, 3)
            .with_repulsion_threshold(2);
        let engine_config = EngineConfig::default()
            .with_max_iteration(0)
            .with_max_stall_iteration(6)
            .with_seed(9);
        let mut algorithm = SwarmAlgorithm::new(swarm_config).unwrap();
        algorithm.push(particle_seed(2));
        let evaluation = Evaluation::new(Arc::new(|_: &[f64]| 1.0));
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
    fn test_plain_fill_up_clones_template() {
        let swarm_config = SwarmConfig::default()
            .with_neighborhoods(1, 4)
            .with_random_fill_up(false);
        let engine_config = EngineConfig::default().with_max_iteration(1).with_seed(5);
        let mut engine = sphere_swarm(swarm_config, engine_config);
        engine.optimize(0).unwrap();
        // All fillers started from the template position (3, 3, 3), so
        // after one evaluation-only iteration they are still identical.
        let first = engine.algorithm().population()[0].params().values().to_vec();
        for particle in engine.algorithm().population() {
            assert_eq!(particle.params().values(), &first[..]);
        }
    }
}
