//! Learned fleet control.
//!
//! Observations, the distribution policy interface, fixed baselines and the
//! episode orchestrator are always available. The graph neural network
//! actor-critic and its training loop require the `rl-nn` feature flag
//! (which brings in `tch`).

pub mod config;
pub mod desired;
pub mod matching;
pub mod metrics;
pub mod observation;
pub mod orchestrator;
pub mod policy;
pub mod telemetry;
pub mod training;
pub mod types;

#[cfg(feature = "rl-nn")]
pub mod distribution;
#[cfg(feature = "rl-nn")]
pub mod network;

pub use config::ControlConfig;
pub use desired::DesiredAccumulation;
pub use matching::derive_passenger_flow;
pub use metrics::EvaluationMetrics;
pub use observation::{GraphObservation, ObservationBuilder};
pub use orchestrator::{EpisodeSummary, TrainingOrchestrator};
pub use policy::{
    ActionStats, DistributionPolicy, EqualDistributionPolicy, HoldPositionPolicy, PolicyDecision, UpdateStats,
};
pub use telemetry::{LogTelemetry, MemoryTelemetry, NullTelemetry, TelemetrySink};
pub use training::TrajectoryBuffer;
pub use types::{ActionMode, EpisodeMode, Learning, MatchingMode, PolicyVariant};

#[cfg(feature = "rl-nn")]
pub use distribution::ActionDistribution;
#[cfg(feature = "rl-nn")]
pub use network::{GnnActor, GnnCritic, GraphEncoder};
#[cfg(feature = "rl-nn")]
pub use training::{A2CAgent, TrainingConfig};
