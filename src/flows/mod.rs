//! Flow optimization: the incremental LP layer and the two per-timestep
//! flow problems built on it.

pub mod env;
pub mod model;
pub mod passenger;
pub mod rebalancing;


use log::warn;

use crate::fleet::{EdgeKind, FleetGraph};

pub use env::SolverEnv;
pub use model::{ColumnHandle, IncrementalModel, LpSolution, RowHandle, Sense};
pub use passenger::PassengerFlowSolver;
pub use rebalancing::RebalancingFlowSolver;

/// Vehicles dispatched on each passenger trip edge ([`FleetGraph::trips`] order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassengerFlow {
    pub vehicles: Vec<i64>,
}

impl PassengerFlow {
    pub fn new(vehicles: Vec<i64>) -> Self {
        Self { vehicles }
    }

    pub fn zeros(trips: usize) -> Self {
        Self {
            vehicles: vec![0; trips],
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.vehicles.iter().sum()
    }
}

/// Vehicles sent along each edge of the state graph (edge-id order), idle
/// self-loops included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalancingFlow {
    pub vehicles: Vec<i64>,
}

impl RebalancingFlow {
    pub fn new(vehicles: Vec<i64>) -> Self {
        Self { vehicles }
    }

    pub fn zeros(edges: usize) -> Self {
        Self {
            vehicles: vec![0; edges],
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Vehicles that leave their node (road and charging edges).
    pub fn moved_vehicles(&self, graph: &FleetGraph) -> i64 {
        graph
            .edges()
            .filter(|(_, _, _, e)| e.kind != EdgeKind::Idle)
            .map(|(id, _, _, _)| self.vehicles[id])
            .sum()
    }
}

/// Rounds LP values to whole vehicles, warning about values that were not
/// integral within `tolerance`. Negative noise is clipped to zero.
pub(crate) fn integralize(values: &[f64], tolerance: f64, model: &'static str) -> Vec<i64> {
    let mut off_grid = 0usize;
    let rounded = values
        .iter()
        .map(|&v| {
            let r = v.round();
            if (v - r).abs() > tolerance {
                off_grid += 1;
            }
            r.max(0.0) as i64
        })
        .collect();
    if off_grid > 0 {
        warn!("{}: {} flow values were not integral and were rounded", model, off_grid);
    }
    rounded
}

/// Lowers entries of `flow` listed in `members` (last first) until their sum is
/// at most `limit`.
pub(crate) fn trim_to_limit(flow: &mut [i64], members: &[usize], limit: i64) {
    let mut excess = members.iter().map(|&i| flow[i]).sum::<i64>() - limit.max(0);
    for &i in members.iter().rev() {
        if excess <= 0 {
            break;
        }
        let cut = flow[i].min(excess);
        flow[i] -= cut;
        excess -= cut;
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn integralize_rounds_and_clips() {
        let v = integralize(&[0.0, 2.9999999, -1e-9, 4.4], 1e-6, "test");
        assert_eq!(v, vec![0, 3, 0, 4]);
    }

    #[test]
    fn trim_removes_excess_from_the_back() {
        let mut flow = vec![3, 2, 4];
        trim_to_limit(&mut flow, &[0, 2], 5);
        assert_eq!(flow, vec![3, 2, 2]);
        trim_to_limit(&mut flow, &[0, 1, 2], 1);
        assert_eq!(flow, vec![1, 0, 0]);
    }
}
