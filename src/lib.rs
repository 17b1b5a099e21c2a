//! Distributed population-based optimization runtime.
//!
//! Drives a population of candidate solutions through iterated
//! adaptation and evaluation, dispatching the evaluations across one of
//! three executor backends:
//!
//! - **Serial**: on the caller's thread.
//! - **Thread pool**: a submission-and-drain pool with dynamic
//!   resizing.
//! - **Brokered TCP**: a command-framed protocol between the engine's
//!   consumer and remote worker clients, with keep-alive, idle backoff,
//!   and reconnect jitter.
//!
//! # Architecture
//!
//! The [`engine`] module owns the optimization loop: halt criteria,
//! stall accounting, best-solution queues, checkpoints, and pluggable
//! monitors. Algorithm variants plug in through
//! [`engine::Algorithm`]: the [`ea`] module provides μ/ν evolutionary
//! selection (including pareto modes), the [`swarm`] module a
//! neighborhood-based particle swarm.
//!
//! Candidate solutions ([`individual::Individual`]) cache their fitness
//! behind a tri-state freshness flag and transform raw values under one
//! of four evaluation policies, so constraint handling is uniform
//! across all variants and backends.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use paropt::ea::{EaConfig, EvolutionaryAlgorithm};
//! use paropt::engine::{Engine, EngineConfig};
//! use paropt::executor::{Evaluation, SerialExecutor};
//! use paropt::individual::{Adaptor, Individual, Parameters};
//!
//! let mut algorithm =
//!     EvolutionaryAlgorithm::new(EaConfig::default().with_sizes(16, 4))?;
//! let params = Parameters::uniform_bounds(5, -5.0, 5.0)?;
//! algorithm.push(Individual::new(params, Adaptor::default()));
//!
//! let evaluation =
//!     Evaluation::new(Arc::new(|p: &[f64]| p.iter().map(|x| x * x).sum::<f64>()));
//! let mut engine = Engine::new(
//!     algorithm,
//!     EngineConfig::default().with_max_iteration(200).with_seed(42),
//!     Box::new(SerialExecutor::new(evaluation)),
//! )?;
//! let summary = engine.optimize(0)?;
//! println!("best: {}", summary.best_raw);
//! ```

pub mod bestq;
pub mod broker;
pub mod ea;
pub mod engine;
pub mod error;
pub mod executor;
pub mod individual;
pub mod logging;
pub mod net;
pub mod pool;
pub mod random;
pub mod swarm;

pub use error::{Error, Result};
