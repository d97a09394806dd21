//! Rebalancing min-cost flow.
//!
//! ```text
//! min  Σ_e x_e · cost_e(t) + P · Σ_n (short_n + excess_n)
//! s.t. Σ_{e ∈ out(n)} x_e = idle[n]                                 for every node
//!      Σ_{e ∈ in(n)} x_e + short_n − excess_n = desired[n]         for every node
//!      Σ_{e charging at r} x_e ≤ capacity[r]                        for every station
//!      x, short, excess ≥ 0
//! ```
//!
//! Edge costs are zero on idle loops, the operating cost times travel time on
//! roads, and the energy price times levels gained on charging edges. The slack
//! pair keeps the problem feasible when a target cannot be reached (for
//! example a node no edge can enter) and is priced at
//! [`SolverEnv::unmet_target_penalty`].

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use super::env::SolverEnv;
use super::model::{ColumnHandle, IncrementalModel, RowHandle, Sense};
use super::{integralize, trim_to_limit, RebalancingFlow};
use crate::error::{EamodError, Result};
use crate::fleet::{EdgeId, EdgeKind, StateModel};

const MODEL: &str = "rebalancing";

#[derive(Debug, Clone)]
struct NodeRows {
    supply: RowHandle,
    target: RowHandle,
    short: ColumnHandle,
    idle_loop: EdgeId,
    /// Non-idle edges leaving the node, in edge-id order.
    moves: Vec<EdgeId>,
}

#[derive(Debug, Clone)]
struct StationRow {
    region: usize,
    row: RowHandle,
    members: Vec<EdgeId>,
}

/// Built once from the state graph; refreshed in place each timestep.
#[derive(Debug, Clone)]
pub struct RebalancingFlowSolver {
    env: Arc<SolverEnv>,
    model: IncrementalModel,
    edge_columns: Vec<ColumnHandle>,
    nodes: Vec<NodeRows>,
    stations: Vec<StationRow>,
    idle: Vec<i64>,
}

impl RebalancingFlowSolver {
    /// Builds the model structure and loads `desired` together with the idle
    /// vehicles of the state's current time.
    pub fn new(env: Arc<SolverEnv>, state: &StateModel, desired: &[i64]) -> Result<Self> {
        let graph = state.graph();
        let penalty = env.unmet_target_penalty;
        let mut model = IncrementalModel::new(MODEL, Sense::Minimize);

        let edge_columns: Vec<_> = (0..graph.number_edges())
            .map(|_| model.add_column(0.0, (0.0, f64::INFINITY)))
            .collect();

        let mut nodes = Vec::with_capacity(graph.number_nodes());
        for n in 0..graph.number_nodes() {
            let short = model.add_column(penalty, (0.0, f64::INFINITY));
            let excess = model.add_column(penalty, (0.0, f64::INFINITY));

            let out: Vec<_> = graph.outgoing(n).map(|e| (edge_columns[e], 1.0)).collect();
            let supply = model.add_row((0.0, 0.0), &out);

            let mut inflow: Vec<_> = graph.incoming(n).map(|e| (edge_columns[e], 1.0)).collect();
            inflow.push((short, 1.0));
            inflow.push((excess, -1.0));
            let target = model.add_row((0.0, 0.0), &inflow);

            let mut idle_loop = None;
            let mut moves = Vec::new();
            let mut outgoing: Vec<_> = graph.outgoing(n).collect();
            outgoing.sort_unstable();
            for e in outgoing {
                if graph.edge(e).kind == EdgeKind::Idle {
                    idle_loop = Some(e);
                } else {
                    moves.push(e);
                }
            }
            let idle_loop = idle_loop.ok_or_else(|| {
                EamodError::InvalidScenario(format!("node {} has no idle self-loop", n))
            })?;
            nodes.push(NodeRows {
                supply,
                target,
                short,
                idle_loop,
                moves,
            });
        }

        let mut by_region: BTreeMap<usize, Vec<EdgeId>> = BTreeMap::new();
        for (id, source, _, edge) in graph.edges() {
            if edge.kind == EdgeKind::Charge {
                by_region.entry(graph.node(source).region).or_default().push(id);
            }
        }
        let capacities = &state.scenario().cars_per_station_capacity;
        let stations = by_region
            .into_iter()
            .map(|(region, members)| {
                let coefficients: Vec<_> = members.iter().map(|&e| (edge_columns[e], 1.0)).collect();
                let capacity = f64::from(capacities[region]);
                StationRow {
                    region,
                    row: model.add_row((f64::NEG_INFINITY, capacity), &coefficients),
                    members,
                }
            })
            .collect();

        let mut solver = Self {
            env,
            model,
            edge_columns,
            nodes,
            stations,
            idle: Vec::new(),
        };
        solver.update_constraints(desired, state)?;
        solver.update_objective(state);
        Ok(solver)
    }

    /// Reloads idle supply and desired targets.
    ///
    /// Fails if `desired` has the wrong length, holds a negative entry, or does
    /// not sum to the idle vehicles.
    pub fn update_constraints(&mut self, desired: &[i64], state: &StateModel) -> Result<()> {
        let idle = state.idle_accumulation();
        if desired.len() != idle.len() {
            return Err(EamodError::DimensionMismatch {
                what: "desired accumulation",
                expected: idle.len(),
                found: desired.len(),
            });
        }
        if let Some((node, &value)) = desired.iter().enumerate().find(|(_, &v)| v < 0) {
            return Err(EamodError::NegativeAccumulation {
                node,
                time: state.time() + 1,
                value,
            });
        }
        let supply: i64 = idle.iter().sum();
        let demand: i64 = desired.iter().sum();
        if supply != demand {
            return Err(EamodError::UnbalancedProblem { supply, demand });
        }

        for (n, rows) in self.nodes.iter().enumerate() {
            let available = idle[n].max(0) as f64;
            self.model.set_row_bounds(rows.supply, available, available);
            let target = desired[n] as f64;
            self.model.set_row_bounds(rows.target, target, target);
        }
        let capacities = &state.scenario().cars_per_station_capacity;
        for station in &self.stations {
            self.model
                .set_row_bounds(station.row, f64::NEG_INFINITY, f64::from(capacities[station.region]));
        }
        self.idle = idle;
        Ok(())
    }

    /// Reloads edge costs for the state's current time.
    pub fn update_objective(&mut self, state: &StateModel) {
        let t = state.time();
        let op_cost = state.scenario().operational_cost_per_timestep;
        let energy_price = state.scenario().energy_price(t);
        for (id, _, _, edge) in state.graph().edges() {
            let cost = match edge.kind {
                EdgeKind::Idle => 0.0,
                EdgeKind::Road => op_cost * f64::from(state.graph().travel_time(id, t)),
                EdgeKind::Charge => energy_price * edge.charge_delta as f64,
            };
            self.model.set_objective_coefficient(self.edge_columns[id], cost);
        }
    }

    /// Solves and returns a whole-vehicle flow in which every node sends out
    /// exactly its idle vehicles.
    pub fn optimize(&mut self) -> Result<RebalancingFlow> {
        let solution = self.model.solve(&self.env)?;
        let values: Vec<f64> = self.edge_columns.iter().map(|&c| solution.value(c)).collect();
        let mut vehicles = integralize(&values, self.env.integrality_tolerance, MODEL);

        for station in &self.stations {
            let (_, capacity) = self.model.row_bounds(station.row);
            trim_to_limit(&mut vehicles, &station.members, capacity as i64);
        }
        for (n, rows) in self.nodes.iter().enumerate() {
            trim_to_limit(&mut vehicles, &rows.moves, self.idle[n]);
            let moved: i64 = rows.moves.iter().map(|&e| vehicles[e]).sum();
            vehicles[rows.idle_loop] = self.idle[n] - moved;
        }
        let unmet: f64 = self.nodes.iter().map(|rows| solution.value(rows.short)).sum();
        if unmet > self.env.integrality_tolerance {
            warn!("{}: {:.0} vehicles of desired accumulation could not be reached", MODEL, unmet);
        }
        debug!("{}: objective {:.3}", MODEL, solution.objective());
        Ok(RebalancingFlow::new(vehicles))
    }

    pub fn model(&self) -> &IncrementalModel {
        &self.model
    }
}
