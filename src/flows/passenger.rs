//! Passenger matching LP.
//!
//! ```text
//! max  Σ_k x_k · (price(o_k, d_k, t) − c_op · τ(o_k, d_k, t))
//! s.t. Σ_{k ∈ pair(o,d)} x_k ≤ demand(o, d, t)     for every demanded pair
//!      Σ_{k : origin(k) = n} x_k ≤ acc[n][t]         for every origin node
//!      x ≥ 0
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use super::env::SolverEnv;
use super::model::{ColumnHandle, IncrementalModel, RowHandle, Sense};
use super::{integralize, trim_to_limit, PassengerFlow};
use crate::error::Result;
use crate::fleet::{NodeId, StateModel};

const MODEL: &str = "passenger matching";

/// Rows sharing one region pair.
#[derive(Debug, Clone)]
struct PairRow {
    origin: usize,
    destination: usize,
    row: RowHandle,
    members: Vec<usize>,
}

/// Rows sharing one origin node.
#[derive(Debug, Clone)]
struct SupplyRow {
    node: NodeId,
    row: RowHandle,
    members: Vec<usize>,
}

/// Built once from the state graph's trip list; refreshed in place each timestep.
#[derive(Debug, Clone)]
pub struct PassengerFlowSolver {
    env: Arc<SolverEnv>,
    model: IncrementalModel,
    columns: Vec<ColumnHandle>,
    pair_rows: Vec<PairRow>,
    supply_rows: Vec<SupplyRow>,
}

impl PassengerFlowSolver {
    /// Builds the model structure and loads the data of the state's current time.
    pub fn new(env: Arc<SolverEnv>, state: &StateModel) -> Self {
        let trips = state.graph().trips();
        let mut model = IncrementalModel::new(MODEL, Sense::Maximize);
        let columns: Vec<_> = trips
            .iter()
            .map(|_| model.add_column(0.0, (0.0, f64::INFINITY)))
            .collect();

        let mut by_pair: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        let mut by_origin: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
        for (k, trip) in trips.iter().enumerate() {
            by_pair
                .entry((trip.origin_region, trip.destination_region))
                .or_default()
                .push(k);
            by_origin.entry(trip.origin).or_default().push(k);
        }

        let coefficients = |members: &[usize]| -> Vec<(ColumnHandle, f64)> {
            members.iter().map(|&k| (columns[k], 1.0)).collect()
        };
        let pair_rows = by_pair
            .into_iter()
            .map(|((origin, destination), members)| PairRow {
                origin,
                destination,
                row: model.add_row((f64::NEG_INFINITY, 0.0), &coefficients(&members)),
                members,
            })
            .collect();
        let supply_rows = by_origin
            .into_iter()
            .map(|(node, members)| SupplyRow {
                node,
                row: model.add_row((f64::NEG_INFINITY, 0.0), &coefficients(&members)),
                members,
            })
            .collect();

        let mut solver = Self {
            env,
            model,
            columns,
            pair_rows,
            supply_rows,
        };
        solver.update_constraints(state);
        solver.update_objective(state);
        solver
    }

    /// Reloads demand and supply limits for the state's current time.
    pub fn update_constraints(&mut self, state: &StateModel) {
        let t = state.time();
        for pair in &self.pair_rows {
            let demand = state.demand(pair.origin, pair.destination, t).floor().max(0.0);
            self.model.set_row_bounds(pair.row, f64::NEG_INFINITY, demand);
        }
        for supply in &self.supply_rows {
            let available = state.accumulation(supply.node, t).max(0) as f64;
            self.model.set_row_bounds(supply.row, f64::NEG_INFINITY, available);
        }
    }

    /// Reloads per-trip profits for the state's current time.
    pub fn update_objective(&mut self, state: &StateModel) {
        let t = state.time();
        let op_cost = state.scenario().operational_cost_per_timestep;
        for (k, trip) in state.graph().trips().iter().enumerate() {
            let price = state.price(trip.origin_region, trip.destination_region, t);
            let travel = f64::from(state.graph().road_time(trip.origin_region, trip.destination_region, t));
            self.model
                .set_objective_coefficient(self.columns[k], price - op_cost * travel);
        }
    }

    /// Solves and returns a whole-vehicle flow that respects both limits.
    pub fn optimize(&mut self) -> Result<PassengerFlow> {
        let solution = self.model.solve(&self.env)?;
        let mut vehicles = integralize(solution.values(), self.env.integrality_tolerance, MODEL);
        for pair in &self.pair_rows {
            let (_, limit) = self.model.row_bounds(pair.row);
            trim_to_limit(&mut vehicles, &pair.members, limit as i64);
        }
        for supply in &self.supply_rows {
            let (_, limit) = self.model.row_bounds(supply.row);
            trim_to_limit(&mut vehicles, &supply.members, limit as i64);
        }
        debug!(
            "{}: {} vehicles matched, objective {:.3}",
            MODEL,
            vehicles.iter().sum::<i64>(),
            solution.objective()
        );
        Ok(PassengerFlow::new(vehicles))
    }

    pub fn model(&self) -> &IncrementalModel {
        &self.model
    }
}
