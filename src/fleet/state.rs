//! The simulated world: vehicle accumulations, demand realization and the two
//! per-timestep transitions.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::demand::DemandModel;
use super::graph::{EdgeKind, FleetGraph, NodeId};
use super::scenario::Scenario;
use crate::error::{EamodError, Result};
use crate::flows::{PassengerFlow, RebalancingFlow};

/// Telemetry of one transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Trips served (passenger step only).
    pub served_demand: i64,
    /// Fare revenue of the served trips.
    pub revenue: f64,
    /// Operating cost of passenger-carrying vehicles.
    pub operating_cost: f64,
    /// Operating cost of empty repositioning moves.
    pub rebalancing_cost: f64,
    /// Electricity bought on charging edges.
    pub charging_cost: f64,
    /// Vehicles dropped from the requested flow because they were not available.
    pub clamped_vehicles: i64,
}

/// Result of applying a flow to the state.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Raw observation returned by [`StateModel::reset`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateObservation {
    pub time: usize,
    pub accumulation: Vec<i64>,
}

/// Vehicles per region and timestep, split by activity.
#[derive(Debug, Clone, Default)]
pub struct SpatialStats {
    /// Resident vehicles at the start of each timestep.
    pub idle: Vec<Vec<i64>>,
    /// Vehicles that started charging.
    pub charging: Vec<Vec<i64>>,
    /// Vehicles that started an empty repositioning trip.
    pub rebalancing: Vec<Vec<i64>>,
    /// Vehicles that picked up passengers.
    pub passenger: Vec<Vec<i64>>,
}

impl SpatialStats {
    fn new(horizon: usize, spatial: usize) -> Self {
        let table = vec![vec![0; spatial]; horizon + 1];
        Self {
            idle: table.clone(),
            charging: table.clone(),
            rebalancing: table.clone(),
            passenger: table,
        }
    }
}

/// Single source of truth for the simulated fleet.
///
/// Accumulations live in two dense `[node][slot]` matrices: `acc` counts the
/// vehicles resident on a node, `dacc` books vehicles that are on their way and
/// arrive at a later slot. The time axis is bounded by the horizon plus the
/// longest travel time.
///
/// # Lifecycle
///
/// 1. [`StateModel::reset`] draws the episode's demand and places the fleet.
/// 2. Each timestep calls [`StateModel::apply_passenger_step`] and then
///    [`StateModel::apply_rebalancing_step`], which advances the clock.
/// 3. The episode is over once the rebalancing outcome reports `done`.
#[derive(Debug, Clone)]
pub struct StateModel {
    scenario: Scenario,
    graph: FleetGraph,
    demand: DemandModel,
    rng: StdRng,
    time: usize,
    slots: usize,
    acc: Vec<i64>,
    dacc: Vec<i64>,
    fleet_size: i64,
    /// True once `acc[.][t + 1]` has been seeded from `acc[.][t]` this timestep.
    next_slot_ready: bool,
    stats: SpatialStats,
}

impl StateModel {
    /// Builds the state for a validated scenario. The model starts reset with
    /// deterministic demand.
    pub fn new(scenario: Scenario, seed: u64) -> Result<Self> {
        scenario.validate()?;
        let graph = FleetGraph::from_scenario(&scenario);
        let demand = DemandModel::new(&scenario);
        let horizon = scenario.episode_length;
        let slots = horizon + graph.max_travel_time() as usize + 2;
        let n = graph.number_nodes();
        let mut model = Self {
            fleet_size: i64::from(scenario.total_acc),
            stats: SpatialStats::new(horizon, scenario.spatial_nodes),
            scenario,
            graph,
            demand,
            rng: StdRng::seed_from_u64(seed),
            time: 0,
            slots,
            acc: vec![0; n * slots],
            dacc: vec![0; n * slots],
            next_slot_ready: false,
        };
        model.reset(false);
        Ok(model)
    }

    /// Starts a new episode: draws demand (Poisson when `random_demand`), places
    /// the fleet and rewinds the clock.
    pub fn reset(&mut self, random_demand: bool) -> StateObservation {
        self.demand.realize(random_demand, &mut self.rng);
        self.acc.iter_mut().for_each(|a| *a = 0);
        self.dacc.iter_mut().for_each(|a| *a = 0);
        self.time = 0;
        self.next_slot_ready = false;
        self.stats = SpatialStats::new(self.horizon(), self.scenario.spatial_nodes);
        for (node, count) in self.scenario.initial_accumulation().into_iter().enumerate() {
            self.acc[node * self.slots] = count;
        }
        self.record_idle(0);
        StateObservation {
            time: 0,
            accumulation: self.current_accumulation(),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn graph(&self) -> &FleetGraph {
        &self.graph
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn horizon(&self) -> usize {
        self.scenario.episode_length
    }

    pub fn is_done(&self) -> bool {
        self.time >= self.horizon()
    }

    pub fn fleet_size(&self) -> i64 {
        self.fleet_size
    }

    pub fn stats(&self) -> &SpatialStats {
        &self.stats
    }

    /// Resident vehicles on `node` at slot `t` (zero outside the time axis).
    pub fn accumulation(&self, node: NodeId, t: usize) -> i64 {
        if t < self.slots {
            self.acc[node * self.slots + t]
        } else {
            0
        }
    }

    /// Vehicles booked to arrive on `node` at slot `t`.
    pub fn arrivals(&self, node: NodeId, t: usize) -> i64 {
        if t < self.slots {
            self.dacc[node * self.slots + t]
        } else {
            0
        }
    }

    /// Resident vehicles per node at the current time.
    pub fn current_accumulation(&self) -> Vec<i64> {
        (0..self.graph.number_nodes())
            .map(|n| self.accumulation(n, self.time))
            .collect()
    }

    /// Vehicles available for rebalancing: residents not committed to a trip
    /// this timestep. Equal to the current accumulation before the passenger step.
    pub fn idle_accumulation(&self) -> Vec<i64> {
        let slot = if self.next_slot_ready { self.time + 1 } else { self.time };
        (0..self.graph.number_nodes())
            .map(|n| self.accumulation(n, slot))
            .collect()
    }

    pub fn demand(&self, origin: usize, destination: usize, t: usize) -> f64 {
        self.demand.demand(origin, destination, t)
    }

    pub fn price(&self, origin: usize, destination: usize, t: usize) -> f64 {
        self.demand.price(origin, destination, t)
    }

    pub fn demand_model(&self) -> &DemandModel {
        &self.demand
    }

    /// Vehicles accounted for: residents of the reference slot plus every
    /// vehicle still en route after it.
    pub fn accounted_vehicles(&self) -> i64 {
        let (slot, first_in_flight) = if self.next_slot_ready {
            (self.time + 1, self.time + 1)
        } else {
            (self.time, self.time + 1)
        };
        let mut total = 0;
        for n in 0..self.graph.number_nodes() {
            total += self.accumulation(n, slot);
            for t in first_in_flight..self.slots {
                total += self.arrivals(n, t);
            }
        }
        total
    }

    /// Verifies non-negativity and exact fleet conservation.
    pub fn check_conservation(&self) -> Result<()> {
        let slot = if self.next_slot_ready { self.time + 1 } else { self.time };
        for n in 0..self.graph.number_nodes() {
            let value = self.accumulation(n, slot);
            if value < 0 {
                return Err(EamodError::NegativeAccumulation {
                    node: n,
                    time: slot,
                    value,
                });
            }
        }
        let found = self.accounted_vehicles();
        if found != self.fleet_size {
            return Err(EamodError::ConservationViolation {
                time: slot,
                expected: self.fleet_size,
                found,
            });
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_done() {
            return Err(EamodError::EpisodeFinished { time: self.time });
        }
        Ok(())
    }

    fn carry_forward(&mut self) {
        if self.next_slot_ready {
            return;
        }
        let t = self.time;
        for n in 0..self.graph.number_nodes() {
            self.acc[n * self.slots + t + 1] = self.acc[n * self.slots + t];
        }
        self.next_slot_ready = true;
    }

    fn depart(&mut self, origin: NodeId, destination: NodeId, vehicles: i64, travel_time: u32) {
        let t = self.time;
        self.acc[origin * self.slots + t + 1] -= vehicles;
        self.dacc[destination * self.slots + t + travel_time as usize] += vehicles;
    }

    fn record_idle(&mut self, t: usize) {
        if t >= self.stats.idle.len() {
            return;
        }
        for n in 0..self.graph.number_nodes() {
            let region = self.graph.node(n).region;
            self.stats.idle[t][region] += self.accumulation(n, t);
        }
    }

    /// Dispatches vehicles along passenger trip edges.
    ///
    /// `flow` holds one vehicle count per entry of [`FleetGraph::trips`]. Counts
    /// that are negative, exceed the remaining demand of the region pair, or
    /// exceed the vehicles resident on the origin node are clamped and reported
    /// in [`StepInfo::clamped_vehicles`]; the episode continues.
    pub fn apply_passenger_step(&mut self, flow: &PassengerFlow) -> Result<StepOutcome> {
        let trips = self.graph.trips().to_vec();
        if flow.len() != trips.len() {
            return Err(EamodError::DimensionMismatch {
                what: "passenger flow",
                expected: trips.len(),
                found: flow.len(),
            });
        }
        self.ensure_running()?;
        self.carry_forward();
        let t = self.time;
        let spatial = self.scenario.spatial_nodes;
        let op_cost = self.scenario.operational_cost_per_timestep;
        let mut demand_left: Vec<i64> = (0..spatial * spatial)
            .map(|i| self.demand(i / spatial, i % spatial, t).floor() as i64)
            .collect();

        let mut info = StepInfo::default();
        for (k, trip) in trips.iter().enumerate() {
            let requested = flow.vehicles[k];
            let pair = trip.origin_region * spatial + trip.destination_region;
            let available = self.accumulation(trip.origin, t + 1);
            let served = requested.max(0).min(demand_left[pair]).min(available);
            info.clamped_vehicles += requested - served;
            if served == 0 {
                continue;
            }
            let travel_time = self.graph.road_time(trip.origin_region, trip.destination_region, t);
            self.depart(trip.origin, trip.destination, served, travel_time);
            demand_left[pair] -= served;

            let price = self.price(trip.origin_region, trip.destination_region, t);
            info.served_demand += served;
            info.revenue += served as f64 * price;
            info.operating_cost += served as f64 * op_cost * f64::from(travel_time);
            if let Some(row) = self.stats.passenger.get_mut(t) {
                row[trip.origin_region] += served;
            }
        }
        if info.clamped_vehicles != 0 {
            warn!(
                "t={}: clamped {} vehicles of inconsistent passenger flow",
                t, info.clamped_vehicles
            );
        }
        self.check_conservation()?;
        debug!(
            "t={}: served {} trips, revenue {:.2}",
            t, info.served_demand, info.revenue
        );

        Ok(StepOutcome {
            reward: info.revenue - info.operating_cost,
            done: self.is_done(),
            info,
        })
    }

    /// Moves idle vehicles along the state graph and advances the clock.
    ///
    /// `flow` holds one vehicle count per graph edge. Idle self-loops keep
    /// vehicles in place; road edges cost the operating cost for their travel
    /// time; charging edges cost the energy price per level gained and are
    /// limited by station capacity.
    pub fn apply_rebalancing_step(&mut self, flow: &RebalancingFlow) -> Result<StepOutcome> {
        if flow.len() != self.graph.number_edges() {
            return Err(EamodError::DimensionMismatch {
                what: "rebalancing flow",
                expected: self.graph.number_edges(),
                found: flow.len(),
            });
        }
        self.ensure_running()?;
        self.carry_forward();
        let t = self.time;
        let op_cost = self.scenario.operational_cost_per_timestep;
        let energy_price = self.scenario.energy_price(t);
        let mut station_load = vec![0i64; self.scenario.spatial_nodes];

        let moves: Vec<_> = self
            .graph
            .edges()
            .filter(|(_, _, _, edge)| edge.kind != EdgeKind::Idle)
            .map(|(id, s, d, edge)| (id, s, d, edge.kind, edge.charge_delta))
            .collect();

        let mut info = StepInfo::default();
        for (id, source, dest, kind, charge_delta) in moves {
            let requested = flow.vehicles[id];
            let region = self.graph.node(source).region;
            let mut moved = requested.max(0).min(self.accumulation(source, t + 1));
            if kind == EdgeKind::Charge {
                let capacity = i64::from(self.scenario.cars_per_station_capacity[region]);
                moved = moved.min(capacity - station_load[region]).max(0);
                station_load[region] += moved;
            }
            info.clamped_vehicles += requested.max(0) - moved;
            if moved == 0 {
                continue;
            }
            let travel_time = self.graph.travel_time(id, t);
            self.depart(source, dest, moved, travel_time);
            match kind {
                EdgeKind::Road => {
                    info.rebalancing_cost += moved as f64 * op_cost * f64::from(travel_time);
                    if let Some(row) = self.stats.rebalancing.get_mut(t) {
                        row[region] += moved;
                    }
                }
                EdgeKind::Charge => {
                    info.charging_cost += moved as f64 * energy_price * charge_delta as f64;
                    if let Some(row) = self.stats.charging.get_mut(t) {
                        row[region] += moved;
                    }
                }
                EdgeKind::Idle => {}
            }
        }
        if info.clamped_vehicles != 0 {
            warn!(
                "t={}: clamped {} vehicles of inconsistent rebalancing flow",
                t, info.clamped_vehicles
            );
        }

        for n in 0..self.graph.number_nodes() {
            let landed = self.dacc[n * self.slots + t + 1];
            self.acc[n * self.slots + t + 1] += landed;
        }
        self.time += 1;
        self.next_slot_ready = false;
        self.record_idle(self.time);
        self.check_conservation()?;

        Ok(StepOutcome {
            reward: -(info.rebalancing_cost + info.charging_cost),
            done: self.is_done(),
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::scenario::ScenarioBuilder;

    fn model() -> StateModel {
        let scenario = ScenarioBuilder::new(2, 3, 4)
            .place(0, 2, 4)
            .place(1, 1, 2)
            .charging_station(0, 1)
            .trip(0, 0, 1, 3.0, 10.0)
            .travel_time(0, 0, 1, 2)
            .operational_cost(0.5)
            .energy_prices(vec![2.0])
            .build()
            .unwrap();
        StateModel::new(scenario, 7).unwrap()
    }

    fn trip_flow(state: &StateModel, per_trip: i64) -> PassengerFlow {
        PassengerFlow::new(vec![per_trip; state.graph().trips().len()])
    }

    #[test]
    fn reset_places_fleet() {
        let mut state = model();
        let obs = state.reset(false);
        assert_eq!(obs.time, 0);
        assert_eq!(obs.accumulation.iter().sum::<i64>(), 6);
        assert_eq!(obs.accumulation[state.graph().node_id(0, 2)], 4);
        state.check_conservation().unwrap();
    }

    #[test]
    fn passenger_step_books_arrivals() {
        let mut state = model();
        let outcome = state.apply_passenger_step(&trip_flow(&state, 2)).unwrap();
        assert_eq!(outcome.info.served_demand, 2);
        // 2 trips × (10 fare − 0.5 × 2 steps)
        assert!((outcome.reward - 18.0).abs() < 1e-9);
        let origin = state.graph().node_id(0, 2);
        let dest = state.graph().node_id(1, 1);
        assert_eq!(state.idle_accumulation()[origin], 2);
        assert_eq!(state.arrivals(dest, 2), 2);
        assert_eq!(state.accounted_vehicles(), 6);
    }

    #[test]
    fn passenger_step_clamps_to_supply_and_demand() {
        let mut state = model();
        let outcome = state.apply_passenger_step(&trip_flow(&state, 50)).unwrap();
        // Demand of 3 binds before the 4 vehicles on the origin.
        assert_eq!(outcome.info.served_demand, 3);
        assert_eq!(outcome.info.clamped_vehicles, 47);
        state.check_conservation().unwrap();
    }

    #[test]
    fn negative_flow_is_ignored() {
        let mut state = model();
        let outcome = state.apply_passenger_step(&trip_flow(&state, -3)).unwrap();
        assert_eq!(outcome.info.served_demand, 0);
        assert_eq!(outcome.reward, 0.0);
    }

    #[test]
    fn wrong_flow_length_is_rejected() {
        let mut state = model();
        let err = state
            .apply_passenger_step(&PassengerFlow::new(vec![0; 99]))
            .unwrap_err();
        assert!(matches!(err, EamodError::DimensionMismatch { .. }));
    }

    #[test]
    fn rebalancing_step_advances_and_conserves() {
        let mut state = model();
        state.apply_passenger_step(&trip_flow(&state, 0)).unwrap();
        let mut flow = RebalancingFlow::zeros(state.graph().number_edges());
        let charge_edge = state
            .graph()
            .edges()
            .find(|(_, s, _, e)| e.kind == EdgeKind::Charge && *s == 0)
            .map(|(id, _, _, _)| id);
        // Region 0 charge 0 is empty, so charging from it is clamped away.
        if let Some(id) = charge_edge {
            flow.vehicles[id] = 1;
        }
        let outcome = state.apply_rebalancing_step(&flow).unwrap();
        assert_eq!(state.time(), 1);
        assert_eq!(outcome.info.clamped_vehicles, 1);
        assert_eq!(outcome.reward, 0.0);
        assert_eq!(state.current_accumulation().iter().sum::<i64>(), 6);
    }

    #[test]
    fn road_move_costs_operating_time() {
        let mut state = model();
        state.apply_passenger_step(&trip_flow(&state, 0)).unwrap();
        let road = state
            .graph()
            .edges()
            .find(|(_, s, t, e)| {
                e.kind == EdgeKind::Road && *s == state.graph().node_id(0, 2) && state.graph().node(*t).region == 1
            })
            .map(|(id, _, _, _)| id)
            .unwrap();
        let mut flow = RebalancingFlow::zeros(state.graph().number_edges());
        flow.vehicles[road] = 3;
        let outcome = state.apply_rebalancing_step(&flow).unwrap();
        // 3 vehicles × 0.5 × 2 steps
        assert!((outcome.info.rebalancing_cost - 3.0).abs() < 1e-9);
        // Still on the road after one step.
        assert_eq!(state.current_accumulation().iter().sum::<i64>(), 3);
        assert_eq!(state.accounted_vehicles(), 6);
        state.check_conservation().unwrap();
    }

    #[test]
    fn charging_costs_energy_and_respects_capacity() {
        let scenario = ScenarioBuilder::new(1, 2, 2)
            .place(0, 0, 3)
            .charging_station(0, 2)
            .energy_prices(vec![1.5])
            .build()
            .unwrap();
        let mut state = StateModel::new(scenario, 1).unwrap();
        let charge = state
            .graph()
            .edges()
            .find(|(_, _, _, e)| e.kind == EdgeKind::Charge)
            .map(|(id, _, _, _)| id)
            .unwrap();
        let mut flow = RebalancingFlow::zeros(state.graph().number_edges());
        flow.vehicles[charge] = 3;
        let outcome = state.apply_rebalancing_step(&flow).unwrap();
        assert_eq!(outcome.info.clamped_vehicles, 1);
        assert!((outcome.info.charging_cost - 3.0).abs() < 1e-9);
        assert_eq!(state.current_accumulation(), vec![1, 2]);
        assert_eq!(state.stats().charging[0][0], 2);
    }

    #[test]
    fn episode_reports_done_at_horizon() {
        let mut state = model();
        let edges = state.graph().number_edges();
        for step in 0..4 {
            state.apply_passenger_step(&trip_flow(&state, 0)).unwrap();
            let outcome = state
                .apply_rebalancing_step(&RebalancingFlow::zeros(edges))
                .unwrap();
            assert_eq!(outcome.done, step == 3);
        }
        assert!(state.is_done());
    }

    #[test]
    fn stepping_past_the_horizon_is_rejected() {
        let mut state = model();
        let edges = state.graph().number_edges();
        while !state.is_done() {
            state.apply_passenger_step(&trip_flow(&state, 0)).unwrap();
            state
                .apply_rebalancing_step(&RebalancingFlow::zeros(edges))
                .unwrap();
        }
        let before = state.current_accumulation();
        for _ in 0..3 {
            assert!(matches!(
                state.apply_passenger_step(&trip_flow(&state, 0)),
                Err(EamodError::EpisodeFinished { time: 4 })
            ));
            assert!(matches!(
                state.apply_rebalancing_step(&RebalancingFlow::zeros(edges)),
                Err(EamodError::EpisodeFinished { time: 4 })
            ));
        }
        assert_eq!(state.time(), 4);
        assert_eq!(state.current_accumulation(), before);
        state.check_conservation().unwrap();

        state.reset(false);
        state.apply_passenger_step(&trip_flow(&state, 0)).unwrap();
    }
}
