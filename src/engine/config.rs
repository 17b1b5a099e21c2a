//! Optimization-loop configuration.
//!
//! [`EngineConfig`] carries every knob of the loop driver: halt
//! criteria, checkpointing, monitor cadence, and the evaluation-policy
//! bundle pushed onto each individual. Serialized keys follow the
//! configuration-file names (`maxIteration`, `cpInterval`, ...);
//! durations use the `hh:mm:ss` form.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::individual::{Direction, EvalPolicy};
use crate::net::SerializationMode;

/// Parses a `hh:mm:ss` duration.
pub fn parse_hms(text: &str) -> Result<Duration, String> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("expected hh:mm:ss, got {text:?}"));
    }
    let hours: u64 = parts[0]
        .parse()
        .map_err(|_| format!("bad hours in {text:?}"))?;
    let minutes: u64 = parts[1]
        .parse()
        .map_err(|_| format!("bad minutes in {text:?}"))?;
    let seconds: u64 = parts[2]
        .parse()
        .map_err(|_| format!("bad seconds in {text:?}"))?;
    if minutes >= 60 || seconds >= 60 {
        return Err(format!("minutes/seconds out of range in {text:?}"));
    }
    Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// Formats a duration as `hh:mm:ss` (sub-second parts truncated).
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Serde adapter: `Option<Duration>` as an optional `hh:mm:ss` string.
mod hms_opt {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&format_hms(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            Some(t) => parse_hms(&t).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Parameters of the optimization loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stop once this iteration is reached (0 disables).
    #[serde(rename = "maxIteration")]
    pub max_iteration: u32,

    /// Automatic halt criteria stay inactive below this iteration.
    #[serde(rename = "minIteration")]
    pub min_iteration: u32,

    /// Stop once the stall counter exceeds this (0 disables).
    #[serde(rename = "maxStallIteration")]
    pub max_stall_iteration: u64,

    /// Touch-to-halt file, polled via its modification time.
    #[serde(rename = "terminationFile")]
    pub termination_file: Option<PathBuf>,

    /// Whether the termination file is polled at all.
    #[serde(rename = "touchedTerminationActive")]
    pub touched_termination_active: bool,

    /// Stall streak after which the algorithm's stall action runs
    /// (0 disables).
    #[serde(rename = "individualUpdateStallCounterThreshold")]
    pub individual_update_stall_counter_threshold: u64,

    /// Monitor broadcast frequency in iterations (0 disables).
    #[serde(rename = "reportIteration")]
    pub report_iteration: u32,

    /// Capacity of the global best queue (0 = unlimited).
    #[serde(rename = "nRecordBestIndividuals")]
    pub n_record_best_individuals: usize,

    /// Checkpoint cadence: positive = every N iterations, -1 = on
    /// improvement, 0 = disabled. A checkpoint is always written on
    /// halt when not disabled.
    #[serde(rename = "cpInterval")]
    pub cp_interval: i64,

    /// Directory checkpoints are written to.
    #[serde(rename = "cpDirectory")]
    pub cp_directory: PathBuf,

    /// Base file name for checkpoints.
    #[serde(rename = "cpBaseName")]
    pub cp_base_name: String,

    /// Reuse a single checkpoint file instead of one per checkpoint.
    #[serde(rename = "cp_overwrite")]
    pub cp_overwrite: bool,

    /// Checkpoint encoding (0 text / 1 xml / 2 binary).
    #[serde(rename = "cpSerMode")]
    pub cp_ser_mode: SerializationMode,

    /// Quality halt threshold on the raw primary fitness.
    pub threshold: f64,

    /// Whether the quality threshold is active.
    #[serde(rename = "thresholdActive")]
    pub threshold_active: bool,

    /// Wall-clock limit.
    #[serde(rename = "maxDuration", with = "hms_opt")]
    pub max_duration: Option<Duration>,

    /// Automatic halt criteria stay inactive before this much wall
    /// clock has passed.
    #[serde(rename = "minDuration", with = "hms_opt")]
    pub min_duration: Option<Duration>,

    /// Log a single line naming the halt criterion and final best raw
    /// fitness.
    #[serde(rename = "emitTerminationReason")]
    pub emit_termination_reason: bool,

    /// Fitness transformation policy (0..=3).
    #[serde(rename = "evalPolicy")]
    pub eval_policy: EvalPolicy,

    /// Sigmoid steepness. Must be positive.
    pub steepness: f64,

    /// Sigmoid barrier. Must be positive.
    pub barrier: f64,

    /// Adaption retry cap per adapt call (0 = no cap).
    #[serde(rename = "maxUnsuccessfulAdaptions")]
    pub max_unsuccessful_adaptions: usize,

    /// Maximize instead of minimize.
    pub maximize: bool,

    /// Hand unprocessed items back to the executor for another pass.
    #[serde(rename = "resubmitUnprocessed")]
    pub resubmit_unprocessed: bool,

    /// Random seed; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_iteration: 1000,
            min_iteration: 0,
            max_stall_iteration: 0,
            termination_file: None,
            touched_termination_active: false,
            individual_update_stall_counter_threshold: 0,
            report_iteration: 1,
            n_record_best_individuals: 10,
            cp_interval: 0,
            cp_directory: PathBuf::from("."),
            cp_base_name: "paropt.cp".to_string(),
            cp_overwrite: true,
            cp_ser_mode: SerializationMode::Binary,
            threshold: 0.0,
            threshold_active: false,
            max_duration: None,
            min_duration: None,
            emit_termination_reason: true,
            eval_policy: EvalPolicy::Simple,
            steepness: 1.0,
            barrier: 10.0,
            max_unsuccessful_adaptions: 10,
            maximize: false,
            resubmit_unprocessed: false,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Sets the iteration limit (0 disables).
    pub fn with_max_iteration(mut self, n: u32) -> Self {
        self.max_iteration = n;
        self
    }

    /// Sets the minimum iteration gate for automatic halts.
    pub fn with_min_iteration(mut self, n: u32) -> Self {
        self.min_iteration = n;
        self
    }

    /// Sets the stall limit (0 disables).
    pub fn with_max_stall_iteration(mut self, n: u64) -> Self {
        self.max_stall_iteration = n;
        self
    }

    /// Activates touch-to-halt on the given file.
    pub fn with_termination_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.termination_file = Some(path.into());
        self.touched_termination_active = true;
        self
    }

    /// Sets the stall-action threshold (0 disables).
    pub fn with_stall_action_threshold(mut self, n: u64) -> Self {
        self.individual_update_stall_counter_threshold = n;
        self
    }

    /// Sets the monitor cadence (0 disables).
    pub fn with_report_iteration(mut self, n: u32) -> Self {
        self.report_iteration = n;
        self
    }

    /// Sets the global best queue capacity (0 = unlimited).
    pub fn with_n_record_best_individuals(mut self, n: usize) -> Self {
        self.n_record_best_individuals = n;
        self
    }

    /// Sets the checkpoint cadence.
    pub fn with_cp_interval(mut self, interval: i64) -> Self {
        self.cp_interval = interval;
        self
    }

    /// Sets checkpoint directory and base name.
    pub fn with_cp_location(mut self, dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        self.cp_directory = dir.into();
        self.cp_base_name = base.into();
        self
    }

    /// Selects single-file overwrite checkpointing.
    pub fn with_cp_overwrite(mut self, overwrite: bool) -> Self {
        self.cp_overwrite = overwrite;
        self
    }

    /// Sets the checkpoint encoding.
    pub fn with_cp_ser_mode(mut self, mode: SerializationMode) -> Self {
        self.cp_ser_mode = mode;
        self
    }

    /// Activates the quality halt at the given raw-fitness threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self.threshold_active = true;
        self
    }

    /// Sets the wall-clock limit.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Sets the minimum run time before automatic halts apply.
    pub fn with_min_duration(mut self, duration: Duration) -> Self {
        self.min_duration = Some(duration);
        self
    }

    /// Sets the fitness transformation policy.
    pub fn with_eval_policy(mut self, policy: EvalPolicy) -> Self {
        self.eval_policy = policy;
        self
    }

    /// Sets sigmoid steepness and barrier.
    pub fn with_sigmoid(mut self, steepness: f64, barrier: f64) -> Self {
        self.steepness = steepness;
        self.barrier = barrier;
        self
    }

    /// Sets the adaption retry cap (0 = no cap).
    pub fn with_max_unsuccessful_adaptions(mut self, n: usize) -> Self {
        self.max_unsuccessful_adaptions = n;
        self
    }

    /// Switches between maximization and minimization.
    pub fn with_maximize(mut self, maximize: bool) -> Self {
        self.maximize = maximize;
        self
    }

    /// Lets executors retry unprocessed items themselves.
    pub fn with_resubmit_unprocessed(mut self, resubmit: bool) -> Self {
        self.resubmit_unprocessed = resubmit;
        self
    }

    /// Sets the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The optimization direction implied by `maximize`.
    pub fn direction(&self) -> Direction {
        if self.maximize {
            Direction::Maximize
        } else {
            Direction::Minimize
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.steepness <= 0.0 {
            return Err(format!("steepness must be positive, got {}", self.steepness));
        }
        if self.barrier <= 0.0 {
            return Err(format!("barrier must be positive, got {}", self.barrier));
        }
        if self.cp_interval < -1 {
            return Err(format!(
                "cpInterval must be >= -1, got {}",
                self.cp_interval
            ));
        }
        if self.touched_termination_active && self.termination_file.is_none() {
            return Err("touchedTerminationActive without a terminationFile".into());
        }
        if self.threshold_active && !self.threshold.is_finite() {
            return Err("threshold must be finite when active".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("00:00:05").unwrap(), Duration::from_secs(5));
        assert_eq!(
            parse_hms("01:30:00").unwrap(),
            Duration::from_secs(3600 + 1800)
        );
        assert_eq!(parse_hms("100:00:00").unwrap(), Duration::from_secs(360_000));
        assert!(parse_hms("1:2").is_err());
        assert!(parse_hms("00:99:00").is_err());
        assert!(parse_hms("xx:00:00").is_err());
    }

    #[test]
    fn test_format_hms_roundtrip() {
        for secs in [0u64, 59, 60, 3599, 3600, 86_399] {
            let d = Duration::from_secs(secs);
            assert_eq!(parse_hms(&format_hms(d)).unwrap(), d);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_sigmoid() {
        assert!(EngineConfig::default()
            .with_sigmoid(0.0, 10.0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_sigmoid(1.0, -1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_orphan_touched_termination() {
        let mut config = EngineConfig::default();
        config.touched_termination_active = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_uses_config_file_keys() {
        let config = EngineConfig::default()
            .with_max_iteration(200)
            .with_threshold(1e-3)
            .with_max_duration(Duration::from_secs(90));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"maxIteration\":200"));
        assert!(json.contains("\"thresholdActive\":true"));
        assert!(json.contains("\"maxDuration\":\"00:01:30\""));

        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_iteration, 200);
        assert_eq!(back.max_duration, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_eval_policy_serializes_as_code() {
        let config = EngineConfig::default().with_eval_policy(EvalPolicy::Sigmoid);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"evalPolicy\":2"), "json was {json}");
    }

    #[test]
    fn test_builder_direction() {
        assert_eq!(
            EngineConfig::default().with_maximize(true).direction(),
            Direction::Maximize
        );
    }
}
