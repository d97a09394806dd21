//! eamod - Electric Autonomous Mobility-on-Demand fleet control
//!
//! A per-timestep controller for an electric robotaxi fleet: passenger
//! matching as a linear program, a graph neural network proposing where the
//! idle fleet should be, and a min-cost flow turning that proposal into
//! charging and repositioning moves.

pub mod algorithms;
pub mod error;
pub mod fleet;
pub mod flows;

pub use error::{EamodError, Result};

/// Identifier type used for training runs and their checkpoints.
pub type Id = String;

/// Generates a new unique identifier (UUID v4).
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
