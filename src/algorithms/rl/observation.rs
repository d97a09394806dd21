//! Graph observation encoding.
//!
//! Builds the node feature matrix, edge index and edge feature matrix the
//! graph encoder consumes, from the state right after the passenger step.

use super::config::ControlConfig;
use crate::fleet::StateModel;

/// Dense graph observation, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphObservation {
    pub num_nodes: usize,
    pub node_dim: usize,
    /// `[num_nodes × node_dim]`.
    pub node_features: Vec<f32>,
    pub edge_sources: Vec<i64>,
    pub edge_targets: Vec<i64>,
    pub edge_dim: usize,
    /// `[num_edges × edge_dim]`.
    pub edge_features: Vec<f32>,
    /// Idle vehicles per node the features were built from.
    pub idle: Vec<i64>,
}

impl GraphObservation {
    pub fn num_edges(&self) -> usize {
        self.edge_sources.len()
    }

    pub fn node_row(&self, node: usize) -> &[f32] {
        &self.node_features[node * self.node_dim..(node + 1) * self.node_dim]
    }

    pub fn edge_row(&self, edge: usize) -> &[f32] {
        &self.edge_features[edge * self.edge_dim..(edge + 1) * self.edge_dim]
    }

    /// Total idle vehicles.
    pub fn total_idle(&self) -> i64 {
        self.idle.iter().sum()
    }
}

/// Builds [`GraphObservation`]s.
pub struct ObservationBuilder;

impl ObservationBuilder {
    /// Encodes the state at its current time.
    ///
    /// Node features, in order:
    /// ```text
    /// [charge / L] ++ [idle · s] ++ [(idle + arrivals(t')) · s ; T] ++ [price signal(t') ; T]
    /// ```
    /// for `t' = t+1 ..= t+T`, where the price signal of `(r, c)` sums
    /// `price · demand · s · s_price` over destinations reachable from charge `c`.
    /// Edge features are the edge's travel times departing at `t, t+1, ...`.
    pub fn build(state: &StateModel, config: &ControlConfig) -> GraphObservation {
        let graph = state.graph();
        let scenario = state.scenario();
        let n = graph.number_nodes();
        let horizon = config.policy_horizon;
        let node_dim = config.node_feature_dim();
        let scale = config.scale_factor;
        let t = state.time();
        let idle = state.idle_accumulation();
        let levels = scenario.number_charge_levels as f64;

        let mut node_features = Vec::with_capacity(n * node_dim);
        for (id, &resident) in idle.iter().enumerate() {
            let node = graph.node(id);
            node_features.push((node.charge as f64 / levels) as f32);
            node_features.push((resident as f64 * scale) as f32);
            for future in t + 1..=t + horizon {
                let projected = resident + state.arrivals(id, future);
                node_features.push((projected as f64 * scale) as f32);
            }
            for future in t + 1..=t + horizon {
                let signal: f64 = (0..graph.spatial_nodes())
                    .filter(|&dest| scenario.arrival_charge(node.charge, node.region, dest).is_some())
                    .map(|dest| {
                        state.price(node.region, dest, future)
                            * state.demand(node.region, dest, future)
                            * scale
                            * config.scale_price
                    })
                    .sum();
                node_features.push(signal as f32);
            }
        }

        let (edge_sources, edge_targets) = graph.edge_index();
        let edge_dim = config.edge_feature_dim();
        let mut edge_features = Vec::with_capacity(edge_sources.len() * edge_dim);
        for (id, _, _, _) in graph.edges() {
            for step in 0..edge_dim {
                edge_features.push(graph.travel_time(id, t + step) as f32);
            }
        }

        GraphObservation {
            num_nodes: n,
            node_dim,
            node_features,
            edge_sources,
            edge_targets,
            edge_dim,
            edge_features,
            idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::ScenarioBuilder;

    fn state() -> StateModel {
        let scenario = ScenarioBuilder::new(2, 3, 4)
            .place(0, 2, 4)
            .place(1, 1, 2)
            .charging_station(0, 1)
            .trip(1, 0, 1, 3.0, 10.0)
            .travel_time(0, 0, 1, 2)
            .build()
            .unwrap();
        StateModel::new(scenario, 0).unwrap()
    }

    fn config() -> ControlConfig {
        ControlConfig {
            policy_horizon: 2,
            scale_factor: 0.5,
            scale_price: 0.1,
            ..ControlConfig::default()
        }
    }

    #[test]
    fn shapes_follow_the_graph() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &config());
        assert_eq!(obs.num_nodes, 6);
        assert_eq!(obs.node_dim, 6);
        assert_eq!(obs.node_features.len(), 36);
        assert_eq!(obs.num_edges(), state.graph().number_edges());
        assert_eq!(obs.edge_features.len(), obs.num_edges() * obs.edge_dim);
        assert_eq!(obs.total_idle(), 6);
    }

    #[test]
    fn node_features_encode_charge_fleet_and_prices() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &config());
        let row = obs.node_row(state.graph().node_id(0, 2));
        assert!((row[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((row[1] - 2.0).abs() < 1e-6);
        assert!((row[2] - 2.0).abs() < 1e-6);
        // 3 trips × 10 fare × 0.5 × 0.1 at t = 1, none at t = 2.
        assert!((row[4] - 1.5).abs() < 1e-6);
        assert_eq!(row[5], 0.0);

        // Charge 1 cannot reach the charger-less region 1.
        let low = obs.node_row(state.graph().node_id(0, 1));
        assert_eq!(low[4], 0.0);
    }

    #[test]
    fn edge_features_are_travel_times() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &config());
        let road = state
            .graph()
            .edges()
            .find(|(_, s, t, _)| *s == state.graph().node_id(0, 2) && *t == state.graph().node_id(1, 1))
            .map(|(id, _, _, _)| id)
            .unwrap();
        assert_eq!(obs.edge_row(road)[0], 2.0);
        assert_eq!(obs.edge_row(road)[1], 1.0);
    }
}
