//! Training infrastructure for the episodic actor-critic.
//!
//! Provides the trajectory buffer and discounted returns; the A2C agent, its
//! checkpointable optimizer and checkpoint archive need `rl-nn`.

pub mod buffer;
pub mod returns;

#[cfg(feature = "rl-nn")]
pub mod a2c;
#[cfg(feature = "rl-nn")]
pub mod checkpoint;
#[cfg(feature = "rl-nn")]
pub mod optimizer;

pub use buffer::TrajectoryBuffer;
pub use returns::{discounted_returns, standardize};

#[cfg(feature = "rl-nn")]
pub use a2c::{A2CAgent, TrainingConfig};
