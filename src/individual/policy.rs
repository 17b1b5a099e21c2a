//! Optimization direction and fitness transformation policies.
//!
//! Algorithms never compare raw fitness values directly. Every raw value
//! is paired with a transformed value derived under the population's
//! [`EvalPolicy`], and comparisons run on the transformed side. The
//! direction-adjusted accessor additionally negates in maximization mode
//! so algorithm internals can always assume smaller-is-better.

use serde::{Deserialize, Serialize};

/// Whether the run maximizes or minimizes the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Smaller fitness is better.
    #[default]
    Minimize,
    /// Larger fitness is better.
    Maximize,
}

impl Direction {
    /// The worst representable fitness under this direction.
    pub fn worst_case(self) -> f64 {
        match self {
            Direction::Maximize => f64::MIN,
            Direction::Minimize => f64::MAX,
        }
    }

    /// The best representable fitness under this direction.
    pub fn best_case(self) -> f64 {
        match self {
            Direction::Maximize => f64::MAX,
            Direction::Minimize => f64::MIN,
        }
    }

    /// Returns `true` if `a` is strictly better than `b`.
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Maximize => a > b,
            Direction::Minimize => a < b,
        }
    }

    /// Returns `true` if `a` is worse than or equal to `b`.
    pub fn is_worse_or_equal(self, a: f64, b: f64) -> bool {
        !self.is_better(a, b)
    }

    /// Sign applied to constraint penalties so they always land on the
    /// bad side of the fitness axis.
    pub fn penalty_sign(self) -> f64 {
        match self {
            Direction::Maximize => -1.0,
            Direction::Minimize => 1.0,
        }
    }

    /// Maps a transformed fitness onto the internal smaller-is-better
    /// axis.
    pub fn minimized(self, transformed: f64) -> f64 {
        match self {
            Direction::Maximize => -transformed,
            Direction::Minimize => transformed,
        }
    }
}

/// How raw fitness values are turned into the transformed values that
/// algorithms compare on.
///
/// The policy is fixed once per population. See the crate-level docs for
/// the full transformation table; the short version:
///
/// - `Simple`: evaluate everything, transformed = raw.
/// - `WorstCaseForInvalid`: constraint violators get the worst case on
///   both sides of the pair.
/// - `Sigmoid`: valid solutions are squashed into `±barrier`; violators
///   get a penalty proportional to their validity level.
/// - `WorstKnownValidForInvalid`: violators stay `Delayed` until the
///   iteration-wide worst known valid fitness is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalPolicy {
    /// Evaluate and store the raw value regardless of constraints.
    #[default]
    Simple,
    /// Constraint violators receive the worst-case fitness.
    WorstCaseForInvalid,
    /// Bounded sigmoid transform for valid solutions, scaled penalty for
    /// violators.
    Sigmoid,
    /// Violators are finalized only once the worst known valid fitness
    /// of the iteration is known.
    WorstKnownValidForInvalid,
}

impl EvalPolicy {
    /// Numeric encoding used by configuration files (0..=3).
    pub fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(EvalPolicy::Simple),
            1 => Ok(EvalPolicy::WorstCaseForInvalid),
            2 => Ok(EvalPolicy::Sigmoid),
            3 => Ok(EvalPolicy::WorstKnownValidForInvalid),
            other => Err(format!("unknown evalPolicy code {other} (expected 0..=3)")),
        }
    }

    /// The numeric configuration code of this policy.
    pub fn code(self) -> u8 {
        match self {
            EvalPolicy::Simple => 0,
            EvalPolicy::WorstCaseForInvalid => 1,
            EvalPolicy::Sigmoid => 2,
            EvalPolicy::WorstKnownValidForInvalid => 3,
        }
    }
}

// Configuration files and the wire both carry the policy as its
// numeric code.
impl Serialize for EvalPolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for EvalPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        EvalPolicy::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// A `(raw, transformed)` fitness value for one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessPair {
    /// Value returned by the user's evaluation function (or the worst
    /// case for invalid solutions).
    pub raw: f64,
    /// Value optimization algorithms compare on.
    pub transformed: f64,
}

impl FitnessPair {
    /// A pair with both sides at the direction's worst case.
    pub fn worst(direction: Direction) -> Self {
        let w = direction.worst_case();
        FitnessPair {
            raw: w,
            transformed: w,
        }
    }

    /// A pair with both sides at the direction's best case.
    pub fn best(direction: Direction) -> Self {
        let b = direction.best_case();
        FitnessPair {
            raw: b,
            transformed: b,
        }
    }
}

/// Sigmoid transform bounded by `±barrier` with the given steepness.
///
/// Monotone in `x`, asymptotically `±barrier` for large `|x|`.
pub fn sigmoid(x: f64, barrier: f64, steepness: f64) -> f64 {
    debug_assert!(barrier > 0.0 && steepness > 0.0);
    barrier * (steepness * x / barrier).tanh()
}
