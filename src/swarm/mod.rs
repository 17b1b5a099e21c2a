//! Particle-swarm variant.
//!
//! Particles carry a velocity and a personal-best snapshot; fixed-size
//! neighborhoods contribute a local attractor next to the global best.
//! A configurable stall threshold flips the swarm into a repulsion
//! phase that walks away from the known bests.
//!
//! # Key Types
//!
//! - [`SwarmAlgorithm`]: the [`Algorithm`] implementation
//! - [`SwarmConfig`] / [`UpdateRule`]: layout, constants, update rule
//!
//! [`Algorithm`]: crate::engine::Algorithm

mod config;
mod runner;

pub use config::{SwarmConfig, UpdateRule};
pub use runner::{clamp_velocity, SwarmAlgorithm};
