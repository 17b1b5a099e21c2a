//! Evolutionary algorithm variant.
//!
//! μ parents produce ν children by recombination and adaption; parents
//! for the next iteration are selected under one of five sorting
//! schemes, including two pareto modes for multi-criterion problems.
//!
//! # Key Types
//!
//! - [`EvolutionaryAlgorithm`]: the [`Algorithm`] implementation
//! - [`EaConfig`]: sizes, sorting scheme, recombination, growth
//! - [`SortingMode`] / [`RecombinationMethod`]: the scheme enums
//!
//! [`Algorithm`]: crate::engine::Algorithm

mod config;
mod runner;
mod selection;

pub use config::{EaConfig, RecombinationMethod, SortingMode};
pub use runner::EvolutionaryAlgorithm;
pub use selection::dominates;
