//! Swarm configuration.

use serde::{Deserialize, Serialize};

/// Velocity update rule (configuration codes 0/1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateRule {
    /// One random factor per attraction term, shared by all dimensions.
    Linear,
    /// One random factor per dimension (the classic PSO rule).
    #[default]
    Classic,
}

impl UpdateRule {
    /// Decodes the configuration code.
    pub fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(UpdateRule::Linear),
            1 => Ok(UpdateRule::Classic),
            other => Err(format!("unknown updateRule {other} (expected 0 or 1)")),
        }
    }

    /// The configuration code.
    pub fn code(self) -> u8 {
        match self {
            UpdateRule::Linear => 0,
            UpdateRule::Classic => 1,
        }
    }
}

impl Serialize for UpdateRule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for UpdateRule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        UpdateRule::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// Parameters of the swarm variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Number of fixed-size neighborhoods.
    #[serde(rename = "nNeighborhoods")]
    pub n_neighborhoods: usize,

    /// Particles per neighborhood.
    #[serde(rename = "nNeighborhoodMembers")]
    pub n_neighborhood_members: usize,

    /// Attraction towards a particle's personal best.
    #[serde(rename = "cPersonal")]
    pub c_personal: f64,

    /// Attraction towards the neighborhood best.
    #[serde(rename = "cNeighborhood")]
    pub c_neighborhood: f64,

    /// Attraction towards the global best.
    #[serde(rename = "cGlobal")]
    pub c_global: f64,

    /// Inertia applied to the previous velocity.
    #[serde(rename = "cVelocity")]
    pub c_velocity: f64,

    /// Per-dimension velocity cap as a fraction of the bound span
    /// (0, 1].
    #[serde(rename = "velocityRangePercentage")]
    pub velocity_range_percentage: f64,

    /// Velocity update rule.
    #[serde(rename = "updateRule")]
    pub update_rule: UpdateRule,

    /// Whether filler particles are randomized.
    #[serde(rename = "randomFillUp")]
    pub random_fill_up: bool,

    /// Stall streak that flips the swarm into its repulsion phase
    /// (0 disables).
    #[serde(rename = "repulsionThreshold")]
    pub repulsion_threshold: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        SwarmConfig {
            n_neighborhoods: 5,
            n_neighborhood_members: 20,
            c_personal: 2.0,
            c_neighborhood: 2.0,
            c_global: 0.3,
            c_velocity: 0.7,
            velocity_range_percentage: 0.15,
            update_rule: UpdateRule::default(),
            random_fill_up: true,
            repulsion_threshold: 0,
        }
    }
}

impl SwarmConfig {
    /// Sets the neighborhood layout.
    pub fn with_neighborhoods(mut self, n: usize, members: usize) -> Self {
        self.n_neighborhoods = n;
        self.n_neighborhood_members = members;
        self
    }

    /// Sets the four velocity-update constants.
    pub fn with_constants(
        mut self,
        personal: f64,
        neighborhood: f64,
        global: f64,
        velocity: f64,
    ) -> Self {
        self.c_personal = personal;
        self.c_neighborhood = neighborhood;
        self.c_global = global;
        self.c_velocity = velocity;
        self
    }

    /// Sets the velocity cap fraction.
    pub fn with_velocity_range_percentage(mut self, pct: f64) -> Self {
        self.velocity_range_percentage = pct;
        self
    }

    /// Sets the update rule.
    pub fn with_update_rule(mut self, rule: UpdateRule) -> Self {
        self.update_rule = rule;
        self
    }

    /// Sets the repulsion threshold (0 disables).
    pub fn with_repulsion_threshold(mut self, threshold: u64) -> Self {
        self.repulsion_threshold = threshold;
        self
    }

    /// Controls filler randomization.
    pub fn with_random_fill_up(mut self, random: bool) -> Self {
        self.random_fill_up = random;
        self
    }

    /// Total swarm size.
    pub fn swarm_size(&self) -> usize {
        self.n_neighborhoods * self.n_neighborhood_members
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_neighborhoods == 0 {
            return Err("nNeighborhoods must be at least 1".into());
        }
        if self.n_neighborhood_members == 0 {
            return Err("nNeighborhoodMembers must be at least 1".into());
        }
        if self.velocity_range_percentage <= 0.0 || self.velocity_range_percentage > 1.0 {
            return Err(format!(
                "velocityRangePercentage must be in (0, 1], got {}",
                self.velocity_range_percentage
            ));
        }
        Ok(())
    }
}
