//! The optimization loop and its supporting machinery.
//!
//! # Core Types
//!
//! - [`Engine`]: drives adapt → evaluate → select cycles to a halt
//! - [`Algorithm`]: the pluggable per-variant operations
//! - [`EngineConfig`]: halt criteria, checkpointing, policy bundle
//! - [`Monitor`] / [`LogMonitor`]: pluggable run observers
//! - [`HaltReason`] / [`RunSummary`]: how and where a run ended
//! - [`EngineSnapshot`]: serializable whole-run state for resume
//!
//! Population-level helpers shared by the algorithm variants live in
//! [`population`]: worst-known-valid accumulation and post-submission
//! repair.

mod checkpoint;
mod config;
mod monitor;
pub mod population;
mod runner;

pub use checkpoint::{checkpoint_path, read_checkpoint, write_checkpoint};
pub use config::{format_hms, parse_hms, EngineConfig};
pub use monitor::{LogMonitor, Monitor, RunStatus};
pub use runner::{Algorithm, Cycle, Engine, EngineSnapshot, HaltReason, RunSummary};
