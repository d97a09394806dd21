//! Process-wide solver environment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Settings shared by every flow model of a run.
///
/// Created once at start-up and handed to both flow solvers behind an [`Arc`].
/// The only mutable part is the solve counter.
#[derive(Debug)]
pub struct SolverEnv {
    /// Distance from the nearest integer above which an LP value is reported
    /// as non-integral.
    pub integrality_tolerance: f64,
    /// Objective price of one vehicle of unmet (or exceeded) target
    /// accumulation in the rebalancing problem.
    pub unmet_target_penalty: f64,
    solves: AtomicU64,
}

impl SolverEnv {
    pub fn new(integrality_tolerance: f64, unmet_target_penalty: f64) -> Self {
        Self {
            integrality_tolerance,
            unmet_target_penalty,
            solves: AtomicU64::new(0),
        }
    }

    /// Default settings wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of LP solves performed through this environment.
    pub fn solves(&self) -> u64 {
        self.solves.load(Ordering::Relaxed)
    }

    pub(crate) fn record_solve(&self) {
        self.solves.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for SolverEnv {
    fn default() -> Self {
        Self::new(1e-6, 1e4)
    }
}
