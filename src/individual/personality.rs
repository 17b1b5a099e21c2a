//! Algorithm-specific scratch records attached to individuals.
//!
//! Exactly one personality is attached while an algorithm owns an
//! individual; the engine strips it when the run ends.

use serde::{Deserialize, Serialize};

use super::policy::FitnessPair;

/// The algorithm-owned scratch record of an individual.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Personality {
    /// No algorithm currently owns this individual.
    #[default]
    None,
    /// Evolutionary-algorithm record.
    Ea(EaPersonality),
    /// Swarm record.
    Swarm(SwarmPersonality),
}

impl Personality {
    /// The EA record, if attached.
    pub fn ea(&self) -> Option<&EaPersonality> {
        match self {
            Personality::Ea(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable EA record, if attached.
    pub fn ea_mut(&mut self) -> Option<&mut EaPersonality> {
        match self {
            Personality::Ea(p) => Some(p),
            _ => None,
        }
    }

    /// The swarm record, if attached.
    pub fn swarm(&self) -> Option<&SwarmPersonality> {
        match self {
            Personality::Swarm(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable swarm record, if attached.
    pub fn swarm_mut(&mut self) -> Option<&mut SwarmPersonality> {
        match self {
            Personality::Swarm(p) => Some(p),
            _ => None,
        }
    }
}

/// Parent/child bookkeeping for evolutionary algorithms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EaPersonality {
    /// Whether the individual currently sits in a parent slot.
    pub is_parent: bool,
    /// Index of the parent this child was copied from, if any.
    pub parent_id: Option<usize>,
    /// Set by pareto selection when the individual is on the front.
    pub on_pareto_front: bool,
}

/// Position/velocity bookkeeping for swarm algorithms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwarmPersonality {
    /// Fixed neighborhood this particle belongs to.
    pub neighborhood: usize,
    /// Velocity vector, same dimensionality as the parameters.
    pub velocity: Vec<f64>,
    /// Best position this particle has visited so far.
    pub personal_best: Option<PersonalBest>,
}

/// Snapshot of a particle's best visited position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalBest {
    /// Parameter values at the best position.
    pub values: Vec<f64>,
    /// Primary fitness at the best position.
    pub fitness: FitnessPair,
}
