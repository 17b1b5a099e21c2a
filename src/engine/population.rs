//! Population-level bookkeeping shared by the algorithm variants.

use tracing::{debug, warn};

use crate::error::Error;
use crate::individual::{Direction, FitnessPair, Individual};

/// Accumulates the per-criterion worst fitness among the valid, clean
/// members of the population, then broadcasts it to every individual.
///
/// Broadcasting finalizes individuals whose evaluation was `Delayed`
/// under the worst-known-valid policy, so the population is fully
/// comparable afterwards (unless nothing valid exists yet).
pub fn update_worst_known_valid(population: &mut [Individual], direction: Direction) {
    let n_criteria = population
        .iter()
        .map(Individual::n_criteria)
        .max()
        .unwrap_or(1);
    // Start from the best case and fold in every valid result.
    let mut worst = vec![FitnessPair::best(direction); n_criteria];
    for individual in population.iter() {
        if !individual.is_clean() || !individual.is_valid() {
            continue;
        }
        for (criterion, slot) in worst.iter_mut().enumerate() {
            if let Some(pair) = individual.cached_fitness(criterion) {
                if direction.is_better(slot.transformed, pair.transformed) {
                    *slot = pair;
                }
            }
        }
    }
    for individual in population.iter_mut() {
        individual.apply_worst_known_valid(&worst);
    }
}

/// Post-submission repair: erases individuals whose evaluation failed
/// or never happened, then refills the population to `nominal` size by
/// cloning the last surviving individual.
///
/// Returns the number of refilled slots. Fails if nothing survived.
pub fn repair_after_submission(
    population: &mut Vec<Individual>,
    nominal: usize,
) -> Result<usize, Error> {
    let before = population.len();
    population.retain(|i| !i.processing_failed() && (i.is_clean() || i.is_delayed()));
    let erased = before - population.len();
    if erased > 0 {
        debug!(erased, "erased failed or unprocessed individuals");
    }

    let survivor = match population.last() {
        Some(last) => last.clone(),
        None => {
            return Err(Error::Evaluation(
                "no individual survived the submission cycle".to_string(),
            ))
        }
    };
    let mut refilled = 0;
    while population.len() < nominal {
        population.push(survivor.clone());
        refilled += 1;
    }
    if refilled > 0 {
        warn!(refilled, "population refilled from last survivor");
    }
    Ok(refilled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::{Adaptor, EvalPolicy, Parameters};

    fn individual(value: f64) -> Individual {
        let mut params = Parameters::uniform_bounds(1, -100.0, 100.0).unwrap();
        params.set_values(&[value]);
        Individual::new(params, Adaptor::default())
    }

    #[test]
    fn test_worst_known_valid_folds_worst_transformed() {
        let mut population: Vec<Individual> = [1.0, 5.0, 3.0]
            .iter()
            .map(|&v| {
                let mut ind = individual(v);
                ind.evaluate(&|p: &[f64]| p[0], None);
                ind
            })
            .collect();
        update_worst_known_valid(&mut population, Direction::Minimize);
        // All individuals were valid; the worst transformed value is 5.
        // No delayed individuals exist, so freshness is untouched.
        assert!(population.iter().all(|i| i.is_clean()));
    }

    #[test]
    fn test_worst_known_valid_finalizes_delayed() {
        let constraint = |p: &[f64]| if p[0] < 0.0 { 4.0 } else { 0.0 };

        let mut valid = individual(6.0);
        valid.set_eval_policy(EvalPolicy::WorstKnownValidForInvalid);
        valid.evaluate(&|p: &[f64]| p[0], Some(&constraint));
        assert!(valid.is_clean());

        let mut invalid = individual(-1.0);
        invalid.set_eval_policy(EvalPolicy::WorstKnownValidForInvalid);
        invalid.set_barrier(2.0).unwrap();
        invalid.evaluate(&|p: &[f64]| p[0], Some(&constraint));
        assert!(invalid.is_delayed());

        let mut population = vec![valid, invalid];
        update_worst_known_valid(&mut population, Direction::Minimize);
        assert!(population[1].is_clean());
        // max(worst_known=6, max(barrier,1)=2) * validity 4 = 24
        assert_eq!(population[1].transformed_fitness().unwrap(), 24.0);
    }

    #[test]
    fn test_repair_erases_and_refills() {
        let mut ok = individual(1.0);
        ok.evaluate(&|p: &[f64]| p[0], None);
        let mut failed = individual(2.0);
        failed.mark_processing_failed();
        let dirty = individual(3.0);

        let mut population = vec![ok.clone(), failed, dirty];
        let refilled = repair_after_submission(&mut population, 3).unwrap();
        assert_eq!(refilled, 2);
        assert_eq!(population.len(), 3);
        for ind in &population {
            assert_eq!(ind.raw_fitness().unwrap(), 1.0);
        }
    }

    #[test]
    fn test_repair_fails_with_no_survivors() {
        let mut failed = individual(2.0);
        failed.mark_processing_failed();
        let mut population = vec![failed];
        assert!(repair_after_submission(&mut population, 1).is_err());
    }
}
