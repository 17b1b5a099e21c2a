//! Seedable random number construction.
//!
//! All stochastic components of the crate draw from a [`Prng`] created
//! here. ChaCha8 is used because its state round-trips through serde,
//! which lets checkpoints resume the exact random stream instead of
//! replaying from the seed.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// The RNG type used throughout the crate.
pub type Prng = ChaCha8Rng;

/// Creates a seeded RNG.
///
/// The same seed always yields the same stream, independent of platform.
pub fn create_rng(seed: u64) -> Prng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Creates an RNG from OS entropy.
pub fn create_rng_entropy() -> Prng {
    ChaCha8Rng::from_os_rng()
}

/// Derives a child RNG from a parent.
///
/// Used to hand independent streams to worker threads while keeping the
/// parent stream deterministic.
pub fn fork_rng(parent: &mut Prng) -> Prng {
    create_rng(parent.random())
}

/// Draws from a normal distribution with the given mean and standard
/// deviation.
///
/// # Panics
/// Panics if `std_dev` is not finite and positive.
pub fn gaussian(rng: &mut Prng, mean: f64, std_dev: f64) -> f64 {
    let normal = Normal::new(mean, std_dev).expect("std_dev must be finite and positive");
    normal.sample(rng)
}
