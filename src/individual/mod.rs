//! Candidate solutions and their evaluation lifecycle.
//!
//! An [`Individual`] carries a bounded real-valued parameter vector, one
//! `(raw, transformed)` fitness pair per criterion, and a tri-state
//! freshness flag. Adaption dirties the cached fitness; evaluation under
//! one of four [`EvalPolicy`] variants cleans it again (or defers it to
//! the end of the iteration for the worst-known-valid policy).
//!
//! # Core Types
//!
//! - [`Individual`]: a candidate solution
//! - [`Parameters`] / [`Adaptor`]: the flattened parameter vector and
//!   its adaption strategy
//! - [`Objective`] / [`Constraint`]: the user's evaluation contract
//! - [`EvalPolicy`] / [`Direction`]: fitness transformation rules
//! - [`Personality`]: algorithm-owned scratch record

mod entity;
mod params;
mod personality;
mod policy;
mod types;

pub use entity::{Freshness, Individual, MARKED_INVALID_VALIDITY};
pub use params::{Adaptor, Parameters};
pub use personality::{EaPersonality, PersonalBest, Personality, SwarmPersonality};
pub use policy::{sigmoid, Direction, EvalPolicy, FitnessPair};
pub use types::{Constraint, EvalContext, Objective};
