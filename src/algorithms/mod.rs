//! Control algorithms driving the fleet.

pub mod rl;

pub use rl::{ControlConfig, DistributionPolicy, TrainingOrchestrator};
