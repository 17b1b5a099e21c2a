//! Pluggable run observers.

use tracing::info;

/// Snapshot of the loop state handed to monitors and custom halt
/// checks.
#[derive(Debug, Clone, Copy)]
pub struct RunStatus {
    /// Current iteration number.
    pub iteration: u32,
    /// Best raw primary fitness seen so far.
    pub best_raw: f64,
    /// Best transformed primary fitness seen so far.
    pub best_transformed: f64,
    /// Iterations since the last improvement.
    pub stalls: u64,
}

/// A side-effect-free observer of the optimization run.
///
/// Notified on run start, every `reportIteration` iterations, and on
/// run end.
pub trait Monitor: Send {
    /// The run is about to enter its first iteration.
    fn on_run_start(&mut self, _status: &RunStatus) {}

    /// Periodic progress broadcast.
    fn on_iteration(&mut self, _status: &RunStatus) {}

    /// The run halted.
    fn on_run_end(&mut self, _status: &RunStatus) {}
}

/// A monitor that reports progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogMonitor;

impl Monitor for LogMonitor {
    fn on_run_start(&mut self, status: &RunStatus) {
        info!(iteration = status.iteration, "optimization run started");
    }

    fn on_iteration(&mut self, status: &RunStatus) {
        info!(
            iteration = status.iteration,
            best_raw = status.best_raw,
            stalls = status.stalls,
            "iteration"
        );
    }

    fn on_run_end(&mut self, status: &RunStatus) {
        info!(
            iteration = status.iteration,
            best_raw = status.best_raw,
            "optimization run ended"
        );
    }
}
