//! Hold-position baseline: every idle vehicle stays where it is.

use super::trait_::{DistributionPolicy, PolicyDecision, UpdateStats};
use crate::algorithms::rl::observation::GraphObservation;
use crate::algorithms::rl::training::buffer::TrajectoryBuffer;
use crate::algorithms::rl::types::{ActionMode, Learning};
use crate::error::Result;

/// Shares proportional to the current idle accumulation. Never learns.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldPositionPolicy;

impl HoldPositionPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl DistributionPolicy for HoldPositionPolicy {
    type Saved = ();

    fn act(
        &mut self,
        observation: &GraphObservation,
        _mode: ActionMode,
        _learning: Learning,
    ) -> Result<PolicyDecision<()>> {
        let shares = observation.idle.iter().map(|&v| v.max(0) as f64).collect();
        Ok(PolicyDecision::plain(shares))
    }

    fn update(&mut self, trajectory: &mut TrajectoryBuffer<()>, _learning: Learning) -> Result<Option<UpdateStats>> {
        trajectory.clear();
        Ok(None)
    }

    fn name(&self) -> &str {
        "hold"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::rl::desired::DesiredAccumulation;
    use crate::algorithms::rl::policy::EqualDistributionPolicy;

    fn observation(idle: Vec<i64>) -> GraphObservation {
        GraphObservation {
            num_nodes: idle.len(),
            node_dim: 0,
            node_features: vec![],
            edge_sources: vec![],
            edge_targets: vec![],
            edge_dim: 0,
            edge_features: vec![],
            idle,
        }
    }

    #[test]
    fn hold_reproduces_the_idle_fleet() {
        let obs = observation(vec![3, 0, 5, 2]);
        let decision = HoldPositionPolicy::new()
            .act(&obs, ActionMode::Sample, Learning::LearningEnabled)
            .unwrap();
        let desired = DesiredAccumulation::from_shares(&decision.shares, obs.total_idle(), 0).unwrap();
        assert_eq!(desired.counts(), &[3, 0, 5, 2]);
        assert!(decision.saved.is_none());
    }

    #[test]
    fn equal_spreads_uniformly() {
        let obs = observation(vec![9, 0, 0]);
        let decision = EqualDistributionPolicy::new()
            .act(&obs, ActionMode::Mean, Learning::Frozen)
            .unwrap();
        let desired = DesiredAccumulation::from_shares(&decision.shares, 9, 0).unwrap();
        assert_eq!(desired.counts(), &[3, 3, 3]);
    }

    #[test]
    fn fixed_policies_never_update() {
        let mut buffer = TrajectoryBuffer::new();
        buffer.push((), 1.0);
        let stats = HoldPositionPolicy::new()
            .update(&mut buffer, Learning::LearningEnabled)
            .unwrap();
        assert!(stats.is_none());
        assert!(buffer.is_empty());
    }
}
