//! Policy trait for the control loop.

use std::path::Path;

use crate::algorithms::rl::observation::GraphObservation;
use crate::algorithms::rl::training::buffer::TrajectoryBuffer;
use crate::algorithms::rl::types::{ActionMode, Learning};
use crate::error::Result;

/// Distributional summary of one action, for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActionStats {
    pub concentration_mean: f64,
    pub concentration_std: f64,
    pub value: f64,
    pub log_prob: f64,
}

/// Result of one policy evaluation.
#[derive(Debug)]
pub struct PolicyDecision<S> {
    /// Share of the idle fleet per node. Need not be normalized.
    pub shares: Vec<f64>,
    /// What the update needs to remember about this step; `None` when frozen.
    pub saved: Option<S>,
    pub stats: Option<ActionStats>,
}

impl<S> PolicyDecision<S> {
    /// A decision that records nothing.
    pub fn plain(shares: Vec<f64>) -> Self {
        Self {
            shares,
            saved: None,
            stats: None,
        }
    }
}

/// Scalar results of one policy update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub policy_loss: f64,
    pub value_loss: f64,
    pub mean_value: f64,
    pub mean_concentration: f64,
    pub mean_concentration_std: f64,
    pub mean_log_prob: f64,
    pub std_log_prob: f64,
}

/// A policy producing a distribution of the idle fleet over nodes.
///
/// The orchestrator owns the [`Learning`] flag and passes it to every call; a
/// frozen call must neither save anything for the update nor touch parameters.
pub trait DistributionPolicy {
    /// Per-step record kept for the update (log-probability and value for an
    /// actor-critic, `()` for fixed policies).
    type Saved;

    /// Evaluates the policy on an observation.
    ///
    /// # Arguments
    ///
    /// * `observation` - Graph observation after the passenger step
    /// * `mode` - Sample or take the distribution mean
    /// * `learning` - Whether the step is recorded for a later update
    fn act(
        &mut self,
        observation: &GraphObservation,
        mode: ActionMode,
        learning: Learning,
    ) -> Result<PolicyDecision<Self::Saved>>;

    /// Runs one update on a finished episode and clears the buffer.
    ///
    /// # Returns
    ///
    /// `None` if nothing was learned (frozen, empty buffer or fixed policy).
    fn update(
        &mut self,
        trajectory: &mut TrajectoryBuffer<Self::Saved>,
        learning: Learning,
    ) -> Result<Option<UpdateStats>>;

    /// Persists parameters and optimizer state. Fixed policies have none.
    fn save_checkpoint(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Returns a human-readable name for this policy.
    fn name(&self) -> &str;
}
