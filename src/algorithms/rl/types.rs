//! Core enums shared by the control loop and the learning code.
//!
//! Trainability, action selection and the matching source are explicit values
//! owned by the orchestrator and passed down, never flags toggled on a network
//! from the outside.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a policy may record trajectories and apply gradients this episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Learning {
    LearningEnabled,
    Frozen,
}

impl Learning {
    pub fn is_enabled(self) -> bool {
        matches!(self, Learning::LearningEnabled)
    }

    /// `LearningEnabled` when `enabled`, else `Frozen`.
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Learning::LearningEnabled
        } else {
            Learning::Frozen
        }
    }
}

/// How an action is drawn from the policy distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionMode {
    /// Stochastic sample (training).
    Sample,
    /// Distribution mean, no sampling (evaluation and deployment).
    Mean,
}

/// Source of the passenger flow for a timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchingMode {
    /// Passenger matching LP.
    Optimization,
    /// Flow derived from the matching policy's per-node output.
    Learned,
}

/// Episode flavour requested from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpisodeMode {
    /// Random demand, sampled actions, updates allowed.
    Training,
    /// Deterministic demand, mean actions, everything frozen.
    Evaluation,
}

/// Shape of the rebalancing action distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyVariant {
    /// Every node takes part in one Dirichlet sample.
    Dirichlet,
    /// A Bernoulli gate per node; the Dirichlet covers the active nodes only.
    ZeroInflated,
}

impl fmt::Display for MatchingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchingMode::Optimization => write!(f, "optimization"),
            MatchingMode::Learned => write!(f, "learned"),
        }
    }
}

impl fmt::Display for PolicyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyVariant::Dirichlet => write!(f, "dirichlet"),
            PolicyVariant::ZeroInflated => write!(f, "zero-inflated"),
        }
    }
}
