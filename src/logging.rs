//! Tracing setup for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber, filtered through `RUST_LOG`
/// (defaulting to `info`). Subsequent calls are no-ops, so libraries
/// and tests can call this freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
    }
}
