//! Parameter vectors and adaption strategies.
//!
//! Concrete parameter-type objects (integer genes, boolean genes, ...)
//! live outside this crate; the runtime streams every candidate as a
//! flattened real-valued vector with per-dimension bounds, which is the
//! uniform representation executors and the wire protocol work with.

use serde::{Deserialize, Serialize};

use crate::random::{gaussian, Prng};
use rand::Rng;

/// An ordered, bounded real-valued parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    values: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Parameters {
    /// Creates a parameter vector with explicit values and bounds.
    ///
    /// Returns an error if the lengths disagree or any bound pair is
    /// inverted.
    pub fn new(values: Vec<f64>, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, String> {
        if values.len() != lower.len() || values.len() != upper.len() {
            return Err(format!(
                "parameter vector lengths disagree: {} values, {} lower bounds, {} upper bounds",
                values.len(),
                lower.len(),
                upper.len()
            ));
        }
        for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo > hi {
                return Err(format!("inverted bounds at dimension {i}: [{lo}, {hi}]"));
            }
        }
        Ok(Parameters {
            values,
            lower,
            upper,
        })
    }

    /// Creates a zero-initialized vector over uniform bounds.
    pub fn uniform_bounds(dim: usize, lower: f64, upper: f64) -> Result<Self, String> {
        Self::new(vec![0.0; dim], vec![lower; dim], vec![upper; dim])
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// The flattened value vector.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Lower bounds per dimension.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds per dimension.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Overwrites the value vector, clamping each entry to its bounds.
    ///
    /// # Panics
    /// Panics if `values` has the wrong length.
    pub fn set_values(&mut self, values: &[f64]) {
        assert_eq!(
            values.len(),
            self.values.len(),
            "value vector length mismatch"
        );
        for (i, &v) in values.iter().enumerate() {
            self.values[i] = v.clamp(self.lower[i], self.upper[i]);
        }
    }

    /// Sets a single dimension, clamped to its bounds. Returns `true` if
    /// the stored value actually changed.
    pub fn set_value(&mut self, i: usize, v: f64) -> bool {
        let clamped = v.clamp(self.lower[i], self.upper[i]);
        let changed = clamped != self.values[i];
        self.values[i] = clamped;
        changed
    }

    /// Uniformly re-randomizes every dimension within its bounds.
    pub fn randomize(&mut self, rng: &mut Prng) {
        for i in 0..self.values.len() {
            self.values[i] = if self.lower[i] < self.upper[i] {
                rng.random_range(self.lower[i]..self.upper[i])
            } else {
                self.lower[i]
            };
        }
    }

    /// The bound span of dimension `i`.
    pub fn range(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }
}

/// Adaption strategy applied by [`Individual::adapt`].
///
/// The numeric tuning of adaptors is the caller's business; the runtime
/// only needs adaption to report how many dimensions actually changed so
/// the retry-until-changed loop can do its job.
///
/// [`Individual::adapt`]: super::Individual::adapt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Adaptor {
    /// Adds a Gaussian step `N(0, sigma)` to each dimension with the
    /// given per-dimension probability.
    GaussianStep { sigma: f64, probability: f64 },
    /// Adds a uniform step in `[-width, width]` to each dimension with
    /// the given per-dimension probability.
    UniformStep { width: f64, probability: f64 },
    /// Gaussian steps with an individual sigma per dimension.
    PerDimensionGaussian {
        sigmas: Vec<f64>,
        probability: f64,
    },
    /// Gaussian steps whose sigma itself drifts log-normally on every
    /// pass, so selection can tune the step width down as the
    /// population closes in on an optimum.
    SelfAdaptiveGaussian {
        sigma: f64,
        sigma_adaption: f64,
        probability: f64,
    },
}

impl Adaptor {
    /// Applies one adaption pass. Returns the number of dimensions whose
    /// stored value changed.
    ///
    /// A pass may change nothing: every dimension can miss its
    /// probability draw, or a step can be swallowed by clamping at a
    /// bound. Callers handle retries.
    pub fn adapt(&mut self, params: &mut Parameters, rng: &mut Prng) -> usize {
        let mut changed = 0;
        match self {
            Adaptor::GaussianStep { sigma, probability } => {
                for i in 0..params.dim() {
                    if rng.random_bool(probability.clamp(0.0, 1.0)) {
                        let step = gaussian(rng, 0.0, *sigma);
                        if params.set_value(i, params.values()[i] + step) {
                            changed += 1;
                        }
                    }
                }
            }
            Adaptor::UniformStep { width, probability } => {
                for i in 0..params.dim() {
                    if rng.random_bool(probability.clamp(0.0, 1.0)) {
                        let step = rng.random_range(-width.abs()..=width.abs());
                        if params.set_value(i, params.values()[i] + step) {
                            changed += 1;
                        }
                    }
                }
            }
            Adaptor::PerDimensionGaussian { sigmas, probability } => {
                for i in 0..params.dim() {
                    if rng.random_bool(probability.clamp(0.0, 1.0)) {
                        let sigma = sigmas.get(i).copied().unwrap_or(1.0);
                        let step = gaussian(rng, 0.0, sigma);
                        if params.set_value(i, params.values()[i] + step) {
                            changed += 1;
                        }
                    }
                }
            }
            Adaptor::SelfAdaptiveGaussian {
                sigma,
                sigma_adaption,
                probability,
            } => {
                if *sigma_adaption > 0.0 {
                    *sigma *= gaussian(rng, 0.0, *sigma_adaption).exp();
                    *sigma = sigma.max(1e-12);
                }
                for i in 0..params.dim() {
                    if rng.random_bool(probability.clamp(0.0, 1.0)) {
                        let step = gaussian(rng, 0.0, *sigma);
                        if params.set_value(i, params.values()[i] + step) {
                            changed += 1;
                        }
                    }
                }
            }
        }
        changed
    }

    /// Scales the adaptor's step width by `factor`.
    ///
    /// Algorithms use this to widen the search when a run stalls.
    pub fn scale_step(&mut self, factor: f64) {
        match self {
            Adaptor::GaussianStep { sigma, .. } => *sigma *= factor,
            Adaptor::UniformStep { width, .. } => *width *= factor,
            Adaptor::PerDimensionGaussian { sigmas, .. } => {
                for s in sigmas.iter_mut() {
                    *s *= factor;
                }
            }
            Adaptor::SelfAdaptiveGaussian { sigma, .. } => *sigma *= factor,
        }
    }
}

impl Default for Adaptor {
    fn default() -> Self {
        Adaptor::GaussianStep {
            sigma: 0.1,
            probability: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::create_rng;

    #[test]
    fn test_new_rejects_mismatched_lengths() {
        assert!(Parameters::new(vec![0.0; 3], vec![0.0; 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_new_rejects_inverted_bounds() {
        assert!(Parameters::new(vec![0.0], vec![1.0], vec![-1.0]).is_err());
    }

    #[test]
    fn test_set_values_clamps() {
        let mut p = Parameters::uniform_bounds(2, -1.0, 1.0).unwrap();
        p.set_values(&[5.0, -5.0]);
        assert_eq!(p.values(), &[1.0, -1.0]);
    }

    #[test]
    fn test_randomize_stays_in_bounds() {
        let mut rng = create_rng(3);
        let mut p = Parameters::uniform_bounds(10, -2.0, 2.0).unwrap();
        for _ in 0..100 {
            p.randomize(&mut rng);
            for &v in p.values() {
                assert!((-2.0..=2.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_gaussian_adaptor_reports_changes() {
        let mut rng = create_rng(4);
        let mut p = Parameters::uniform_bounds(5, -10.0, 10.0).unwrap();
        let mut adaptor = Adaptor::GaussianStep {
            sigma: 0.5,
            probability: 1.0,
        };
        let changed = adaptor.adapt(&mut p, &mut rng);
        assert_eq!(changed, 5, "all dimensions should move with p=1");
    }

    #[test]
    fn test_zero_probability_changes_nothing() {
        let mut rng = create_rng(4);
        let mut p = Parameters::uniform_bounds(5, -10.0, 10.0).unwrap();
        let before = p.values().to_vec();
        let mut adaptor = Adaptor::GaussianStep {
            sigma: 0.5,
            probability: 0.0,
        };
        assert_eq!(adaptor.adapt(&mut p, &mut rng), 0);
        assert_eq!(p.values(), &before[..]);
    }

    #[test]
    fn test_self_adaptive_sigma_drifts() {
        let mut rng = create_rng(4);
        let mut p = Parameters::uniform_bounds(3, -10.0, 10.0).unwrap();
        let mut adaptor = Adaptor::SelfAdaptiveGaussian {
            sigma: 0.5,
            sigma_adaption: 0.3,
            probability: 1.0,
        };
        for _ in 0..10 {
            adaptor.adapt(&mut p, &mut rng);
        }
        match adaptor {
            Adaptor::SelfAdaptiveGaussian { sigma, .. } => {
                assert!(sigma > 0.0);
                assert_ne!(sigma, 0.5, "sigma should have drifted");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_scale_step() {
        let mut a = Adaptor::GaussianStep {
            sigma: 0.5,
            probability: 1.0,
        };
        a.scale_step(2.0);
        match a {
            Adaptor::GaussianStep { sigma, .. } => assert!((sigma - 1.0).abs() < 1e-12),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_adaptor_serde_roundtrip() {
        let a = Adaptor::PerDimensionGaussian {
            sigmas: vec![0.1, 0.2],
            probability: 0.7,
        };
        let json = serde_json::to_string(&a).unwrap();
        let back: Adaptor = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
