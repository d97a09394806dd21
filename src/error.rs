use thiserror::Error;

/// Errors raised by the fleet simulation, the flow solvers and the learning loop.
///
/// Conservation, balance and solver errors mean the current episode trajectory
/// is no longer valid; callers propagate them instead of retrying.
#[derive(Debug, Error)]
pub enum EamodError {
    #[error("vehicle conservation violated at t={time}: expected {expected} vehicles, found {found}")]
    ConservationViolation {
        time: usize,
        expected: i64,
        found: i64,
    },

    #[error("negative accumulation {value} at node {node}, t={time}")]
    NegativeAccumulation { node: usize, time: usize, value: i64 },

    #[error("episode finished at t={time}; reset before stepping again")]
    EpisodeFinished { time: usize },

    #[error("{model} linear program is infeasible")]
    InfeasibleModel { model: &'static str },

    #[error("{model} linear program is unbounded")]
    UnboundedModel { model: &'static str },

    #[error("unbalanced rebalancing problem: {supply} idle vehicles vs {demand} desired")]
    UnbalancedProblem { supply: i64, demand: i64 },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid action distribution: {0}")]
    InvalidDistribution(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "rl-nn")]
    #[error(transparent)]
    Tch(#[from] tch::TchError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EamodError>;
