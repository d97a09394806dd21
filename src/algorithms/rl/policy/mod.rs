//! Policy trait and fixed baselines.

pub mod equal;
pub mod hold;
pub mod trait_;

pub use equal::EqualDistributionPolicy;
pub use hold::HoldPositionPolicy;
pub use trait_::{ActionStats, DistributionPolicy, PolicyDecision, UpdateStats};
