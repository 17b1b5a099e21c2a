//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the optimization runtime.
///
/// Local recoveries (refilling a population, skipping a failed work
/// item) are preferred throughout the crate; only invariant violations
/// and unrecoverable faults reach callers through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration or misuse of the API.
    #[error("user error: {0}")]
    User(String),

    /// A fitness accessor was called on a dirty or delayed individual.
    #[error("fitness accessed on an individual whose evaluation is not current")]
    DirtyFitnessAccess,

    /// A user evaluation function failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Encoding or decoding of individuals/checkpoints failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A network session failed.
    #[error("network failure: {0}")]
    Network(String),

    /// The broker queue was closed while work was outstanding.
    #[error("broker disconnected")]
    BrokerDisconnected,

    /// Filesystem or socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
