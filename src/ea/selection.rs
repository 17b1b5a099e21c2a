//! Parent selection for the evolutionary variant.
//!
//! All selection runs on the internal smaller-is-better axis (the
//! direction-adjusted transformed fitness), so the same code serves
//! minimization and maximization.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::individual::Individual;
use crate::random::Prng;

/// Sort key: direction-adjusted transformed fitness; unevaluated
/// individuals sink to the back.
fn min_fitness(individual: &Individual) -> f64 {
    individual.minimized_fitness().unwrap_or(f64::MAX)
}

fn compare(a: &Individual, b: &Individual) -> std::cmp::Ordering {
    min_fitness(a)
        .partial_cmp(&min_fitness(b))
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// `MU_PLUS_NU`: sort the union of parents and children; the best μ
/// land in the parent slots.
pub fn sort_mu_plus_nu(population: &mut [Individual]) {
    population.sort_by(compare);
}

/// `MU_COMMA_NU`: sort only the children and promote the best μ into
/// the parent slots.
pub fn sort_mu_comma_nu(population: &mut [Individual], mu: usize) {
    population[mu..].sort_by(compare);
    for i in 0..mu {
        population[i] = population[mu + i].clone();
    }
}

/// `MU_NU_1_PRETAIN`: comma selection, but the best previous parent is
/// retained if no child beat it.
pub fn sort_mu_nu_1_pretain(population: &mut [Individual], mu: usize) {
    let best_parent = population[..mu]
        .iter()
        .min_by(|a, b| compare(a, b))
        .cloned()
        .expect("at least one parent");
    population[mu..].sort_by(compare);
    let best_child_fitness = min_fitness(&population[mu]);
    if min_fitness(&best_parent) < best_child_fitness {
        population[0] = best_parent;
        for i in 1..mu {
            population[i] = population[mu + i - 1].clone();
        }
    } else {
        for i in 0..mu {
            population[i] = population[mu + i].clone();
        }
    }
}

/// Returns `true` if `a` dominates `b`: for every criterion, `a`'s
/// transformed fitness is not worse than `b`'s.
pub fn dominates(a: &Individual, b: &Individual) -> bool {
    let direction = a.direction();
    let n = a.n_criteria().min(b.n_criteria());
    for criterion in 0..n {
        let (fa, fb) = match (a.cached_fitness(criterion), b.cached_fitness(criterion)) {
            (Some(fa), Some(fb)) => (fa.transformed, fb.transformed),
            _ => return false,
        };
        if direction.is_better(fb, fa) {
            return false;
        }
    }
    true
}

/// Pareto selection over `candidates` (index range of the population):
/// reorders the population so μ parents sit in front.
///
/// Front members beyond μ are randomly shuffled to avoid bias; a front
/// smaller than μ is filled with the best remaining individuals by the
/// direction-adjusted scalar fitness.
pub fn sort_pareto(population: &mut Vec<Individual>, mu: usize, from: usize, rng: &mut Prng) {
    let candidates: Vec<usize> = (from..population.len()).collect();
    let mut front: Vec<usize> = Vec::new();
    for &i in &candidates {
        let dominated = candidates
            .iter()
            .any(|&j| j != i && dominates(&population[j], &population[i]));
        if !dominated {
            front.push(i);
        }
    }
    for (idx, individual) in population.iter_mut().enumerate() {
        if let Some(p) = individual.personality_mut().ea_mut() {
            p.on_pareto_front = front.contains(&idx);
        }
    }

    let mut parents: Vec<usize> = if front.len() > mu {
        let mut shuffled = front;
        shuffled.shuffle(rng);
        shuffled.truncate(mu);
        shuffled
    } else {
        front
    };
    if parents.len() < mu {
        let mut rest: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|i| !parents.contains(i))
            .collect();
        rest.sort_by(|&a, &b| compare(&population[a], &population[b]));
        parents.extend(rest.into_iter().take(mu - parents.len()));
    }

    let chosen: Vec<Individual> = parents.iter().map(|&i| population[i].clone()).collect();
    for (slot, parent) in chosen.into_iter().enumerate() {
        if slot < population.len() {
            population[slot] = parent;
        }
    }
    // Parents should lead with the best scalar fitness.
    let cutoff = mu.min(population.len());
    population[..cutoff].sort_by(compare);
}

/// Draws a parent index with probability proportional to `1/(i+2)`.
pub fn value_weighted_parent(mu: usize, rng: &mut Prng) -> usize {
    let weights: Vec<f64> = (0..mu).map(|i| 1.0 / (i as f64 + 2.0)).collect();
    let total: f64 = weights.iter().sum();
    let threshold = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if cumulative > threshold {
            return i;
        }
    }
    mu - 1 // floating-point fallback
}
