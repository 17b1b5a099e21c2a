//! Evolutionary-algorithm configuration.

use serde::{Deserialize, Serialize};

/// Parent-selection scheme (configuration codes 0..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortingMode {
    /// Select the best parents from the union of parents and children.
    #[default]
    MuPlusNu,
    /// Select the best parents from the children only; iteration 0
    /// falls back to `MuPlusNu`.
    MuCommaNu,
    /// Like `MuCommaNu`, but the best previous parent is retained when
    /// no child beat it.
    MuNu1Pretain,
    /// Multi-criterion pareto selection over parents and children.
    MuPlusNuPareto,
    /// Multi-criterion pareto selection over children only.
    MuCommaNuPareto,
}

impl SortingMode {
    /// Decodes the configuration code.
    pub fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(SortingMode::MuPlusNu),
            1 => Ok(SortingMode::MuCommaNu),
            2 => Ok(SortingMode::MuNu1Pretain),
            3 => Ok(SortingMode::MuPlusNuPareto),
            4 => Ok(SortingMode::MuCommaNuPareto),
            other => Err(format!("unknown sortingMethod {other} (expected 0..=4)")),
        }
    }

    /// The configuration code.
    pub fn code(self) -> u8 {
        match self {
            SortingMode::MuPlusNu => 0,
            SortingMode::MuCommaNu => 1,
            SortingMode::MuNu1Pretain => 2,
            SortingMode::MuPlusNuPareto => 3,
            SortingMode::MuCommaNuPareto => 4,
        }
    }

    /// Whether this mode selects on pareto dominance.
    pub fn is_pareto(self) -> bool {
        matches!(self, SortingMode::MuPlusNuPareto | SortingMode::MuCommaNuPareto)
    }
}

impl Serialize for SortingMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for SortingMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        SortingMode::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// How children inherit from parents (configuration codes 0..=2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecombinationMethod {
    /// The default scheme: value-weighted.
    #[default]
    Default,
    /// Each child inherits from a uniformly random parent.
    Random,
    /// Parent `i` is drawn with probability proportional to `1/(i+2)`;
    /// falls back to random while parent fitnesses are unknown.
    ValueWeighted,
}

impl RecombinationMethod {
    /// Decodes the configuration code.
    pub fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(RecombinationMethod::Default),
            1 => Ok(RecombinationMethod::Random),
            2 => Ok(RecombinationMethod::ValueWeighted),
            other => Err(format!(
                "unknown recombinationMethod {other} (expected 0..=2)"
            )),
        }
    }

    /// The configuration code.
    pub fn code(self) -> u8 {
        match self {
            RecombinationMethod::Default => 0,
            RecombinationMethod::Random => 1,
            RecombinationMethod::ValueWeighted => 2,
        }
    }
}

impl Serialize for RecombinationMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for RecombinationMethod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        RecombinationMethod::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// Parameters of the evolutionary variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EaConfig {
    /// Population size (parents + children).
    pub size: usize,

    /// Number of parents μ; the first μ population slots.
    #[serde(rename = "nParents")]
    pub n_parents: usize,

    /// Parent-selection scheme.
    #[serde(rename = "sortingMethod")]
    pub sorting_method: SortingMode,

    /// Child inheritance scheme.
    #[serde(rename = "recombinationMethod")]
    pub recombination_method: RecombinationMethod,

    /// Children added per iteration while growing (0 disables growth).
    #[serde(rename = "growthRate")]
    pub growth_rate: usize,

    /// Population cap when growth is enabled.
    #[serde(rename = "maxPopulationSize")]
    pub max_population_size: usize,

    /// Adaption parallelism; values above 1 run the adaption sweep on
    /// the shared data-parallel pool.
    #[serde(rename = "nAdaptionThreads")]
    pub n_adaption_threads: usize,
}

impl Default for EaConfig {
    fn default() -> Self {
        EaConfig {
            size: 100,
            n_parents: 5,
            sorting_method: SortingMode::default(),
            recombination_method: RecombinationMethod::default(),
            growth_rate: 0,
            max_population_size: 0,
            n_adaption_threads: 1,
        }
    }
}

impl EaConfig {
    /// Sets population size and parent count.
    pub fn with_sizes(mut self, size: usize, n_parents: usize) -> Self {
        self.size = size;
        self.n_parents = n_parents;
        self
    }

    /// Sets the parent-selection scheme.
    pub fn with_sorting_method(mut self, mode: SortingMode) -> Self {
        self.sorting_method = mode;
        self
    }

    /// Sets the child inheritance scheme.
    pub fn with_recombination_method(mut self, method: RecombinationMethod) -> Self {
        self.recombination_method = method;
        self
    }

    /// Enables growth: `rate` children per iteration up to `max`.
    pub fn with_growth(mut self, rate: usize, max: usize) -> Self {
        self.growth_rate = rate;
        self.max_population_size = max;
        self
    }

    /// Sets the adaption parallelism.
    pub fn with_n_adaption_threads(mut self, n: usize) -> Self {
        self.n_adaption_threads = n;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_parents == 0 {
            return Err("nParents must be at least 1".into());
        }
        match self.sorting_method {
            SortingMode::MuCommaNu | SortingMode::MuNu1Pretain | SortingMode::MuCommaNuPareto => {
                // Comma selection needs at least as many children as
                // parents.
                if self.size < 2 * self.n_parents {
                    return Err(format!(
                        "size {} too small for comma selection with {} parents",
                        self.size, self.n_parents
                    ));
                }
            }
            SortingMode::MuPlusNu | SortingMode::MuPlusNuPareto => {
                if self.size <= self.n_parents {
                    return Err(format!(
                        "size {} must exceed nParents {}",
                        self.size, self.n_parents
                    ));
                }
            }
        }
        if self.growth_rate > 0 && self.max_population_size < self.size {
            return Err(format!(
                "maxPopulationSize {} below initial size {}",
                self.max_population_size, self.size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for code in 0..=4 {
            assert_eq!(SortingMode::from_code(code).unwrap().code(), code);
        }
        assert!(SortingMode::from_code(5).is_err());
        for code in 0..=2 {
            assert_eq!(RecombinationMethod::from_code(code).unwrap().code(), code);
        }
        assert!(RecombinationMethod::from_code(3).is_err());
    }

    #[test]
    fn test_default_is_valid() {
        assert!(EaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_comma_needs_enough_children() {
        let config = EaConfig::default()
            .with_sizes(6, 4)
            .with_sorting_method(SortingMode::MuCommaNu);
        assert!(config.validate().is_err());
        let config = EaConfig::default()
            .with_sizes(8, 4)
            .with_sorting_method(SortingMode::MuCommaNu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_growth_needs_headroom() {
        let config = EaConfig::default().with_sizes(16, 4).with_growth(2, 8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_uses_config_file_keys() {
        let config = EaConfig::default()
            .with_sizes(16, 4)
            .with_sorting_method(SortingMode::MuCommaNu);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"nParents\":4"));
        assert!(json.contains("\"sortingMethod\":1"));
        let back: EaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sorting_method, SortingMode::MuCommaNu);
    }
}
