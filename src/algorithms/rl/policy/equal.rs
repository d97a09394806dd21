//! Fixed-distribution baseline: the idle fleet spread evenly over all nodes.

use super::trait_::{DistributionPolicy, PolicyDecision, UpdateStats};
use crate::algorithms::rl::observation::GraphObservation;
use crate::algorithms::rl::training::buffer::TrajectoryBuffer;
use crate::algorithms::rl::types::{ActionMode, Learning};
use crate::error::Result;

/// Uniform shares regardless of the observation. Never learns.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualDistributionPolicy;

impl EqualDistributionPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl DistributionPolicy for EqualDistributionPolicy {
    type Saved = ();

    fn act(
        &mut self,
        observation: &GraphObservation,
        _mode: ActionMode,
        _learning: Learning,
    ) -> Result<PolicyDecision<()>> {
        let n = observation.num_nodes.max(1);
        Ok(PolicyDecision::plain(vec![1.0 / n as f64; observation.num_nodes]))
    }

    fn update(&mut self, trajectory: &mut TrajectoryBuffer<()>, _learning: Learning) -> Result<Option<UpdateStats>> {
        trajectory.clear();
        Ok(None)
    }

    fn name(&self) -> &str {
        "equal"
    }
}
