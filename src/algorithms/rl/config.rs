//! Configuration of the control loop.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration of the control loop.
///
/// Controls observation encoding, the matching curriculum, baseline mode and
/// checkpoint cadence. Override fields with struct-update syntax:
///
/// ```ignore
/// let config = ControlConfig { matching_switch_episode: 50, ..ControlConfig::default() };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    // --- Observation ---
    /// Look-ahead horizon `T` of the projected accumulation and price features.
    pub policy_horizon: usize,
    /// Scale applied to vehicle counts and prices.
    pub scale_factor: f64,
    /// Extra scale applied to price signals.
    pub scale_price: f64,

    // --- Curriculum ---
    /// First episode whose passenger flow comes from the matching policy.
    pub matching_switch_episode: u64,
    /// Stop updating the rebalancing policy once matching is learned.
    pub freeze_rebalancing_after_switch: bool,
    /// Update the matching policy after the switch.
    pub train_matching_policy: bool,

    // --- Baseline ---
    /// Running a fixed-distribution baseline: never update.
    pub fixed_distribution_baseline: bool,

    // --- Run ---
    /// Seed of the simulated world's demand realization, used by
    /// [`TrainingOrchestrator::from_scenario`](super::TrainingOrchestrator::from_scenario).
    /// Action sampling is seeded by the policy itself.
    pub seed: u64,
    /// Directory for checkpoints. Nothing is written when unset.
    pub checkpoint_dir: Option<PathBuf>,
    /// Periodic checkpoint every this many episodes.
    pub checkpoint_interval: u64,
}

impl ControlConfig {
    /// Per-node feature count: charge, accumulation, `T` projections, `T` price signals.
    pub fn node_feature_dim(&self) -> usize {
        2 * self.policy_horizon + 2
    }

    /// Per-edge feature count (travel times over the same number of steps).
    pub fn edge_feature_dim(&self) -> usize {
        self.node_feature_dim()
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            policy_horizon: 10,
            scale_factor: 0.01,
            scale_price: 0.1,
            matching_switch_episode: 8000,
            freeze_rebalancing_after_switch: true,
            train_matching_policy: false,
            fixed_distribution_baseline: false,
            seed: 10,
            checkpoint_dir: None,
            checkpoint_interval: 10_000,
        }
    }
}
