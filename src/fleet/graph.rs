//! The `(region, charge)` state graph.
//!
//! Nodes are numbered densely as `region * L + charge` and this numbering is
//! fixed for the lifetime of a scenario, so every per-node table in the crate is
//! a plain `Vec` indexed by [`NodeId`].

use std::collections::BTreeSet;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::scenario::Scenario;

/// Dense node identifier.
pub type NodeId = usize;

/// Dense edge identifier (position in the graph's edge list).
pub type EdgeId = usize;

/// A point of the discretized state space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    pub region: usize,
    pub charge: usize,
}

/// What a vehicle does when it moves along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Stay on the node for the next timestep.
    Idle,
    /// Drive empty to another region, consuming charge.
    Road,
    /// Charge in place at a charging station.
    Charge,
}

/// Edge payload of the state graph.
#[derive(Debug, Clone)]
pub struct FleetEdge {
    pub kind: EdgeKind,
    /// Duration in timesteps, one entry per originating timestep.
    pub travel_time: Vec<u32>,
    /// Charge levels gained (positive) or consumed (negative).
    pub charge_delta: i64,
}

/// A passenger trip a vehicle on `origin` can serve, ending on `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripEdge {
    pub origin: NodeId,
    pub destination: NodeId,
    pub origin_region: usize,
    pub destination_region: usize,
}

/// Node and edge sets of a scenario together with the travel-time table.
#[derive(Debug, Clone)]
pub struct FleetGraph {
    graph: DiGraph<Node, FleetEdge>,
    spatial_nodes: usize,
    charge_levels: usize,
    horizon: usize,
    /// `road_time[t][o][d]`, timesteps to drive from region `o` to `d`.
    road_time: Vec<Vec<Vec<u32>>>,
    trips: Vec<TripEdge>,
    max_travel_time: u32,
}

impl FleetGraph {
    /// Builds the node set, the vehicle edge set and the passenger trip list.
    pub fn from_scenario(scenario: &Scenario) -> Self {
        let spatial = scenario.spatial_nodes;
        let levels = scenario.number_charge_levels;
        let horizon = scenario.episode_length;

        let mut road_time = vec![vec![vec![1u32; spatial]; spatial]; horizon];
        for rt in &scenario.reb_time {
            if rt.time_stamp < horizon {
                road_time[rt.time_stamp][rt.origin][rt.destination] = rt.reb_time.max(1);
            }
        }

        let mut graph = DiGraph::with_capacity(spatial * levels, spatial * levels * (spatial + 1));
        for region in 0..spatial {
            for charge in 0..levels {
                graph.add_node(Node { region, charge });
            }
        }

        let mut max_travel_time = 1;
        for region in 0..spatial {
            for charge in 0..levels {
                let from = NodeIndex::new(region * levels + charge);
                graph.add_edge(
                    from,
                    from,
                    FleetEdge {
                        kind: EdgeKind::Idle,
                        travel_time: vec![1; horizon],
                        charge_delta: 0,
                    },
                );
                for dest in (0..spatial).filter(|&d| d != region) {
                    let Some(arrival) = scenario.arrival_charge(charge, region, dest) else {
                        continue;
                    };
                    let travel_time: Vec<u32> = (0..horizon).map(|t| road_time[t][region][dest]).collect();
                    max_travel_time = travel_time.iter().copied().fold(max_travel_time, u32::max);
                    graph.add_edge(
                        from,
                        NodeIndex::new(dest * levels + arrival),
                        FleetEdge {
                            kind: EdgeKind::Road,
                            travel_time,
                            charge_delta: arrival as i64 - charge as i64,
                        },
                    );
                }
                if scenario.charging_stations[region] && charge + 1 < levels {
                    let charged = (charge + scenario.charge_levels_per_charge_step).min(levels - 1);
                    graph.add_edge(
                        from,
                        NodeIndex::new(region * levels + charged),
                        FleetEdge {
                            kind: EdgeKind::Charge,
                            travel_time: vec![1; horizon],
                            charge_delta: (charged - charge) as i64,
                        },
                    );
                }
            }
        }

        let pairs: BTreeSet<(usize, usize)> = scenario
            .trips
            .iter()
            .map(|trip| (trip.origin, trip.destination))
            .collect();
        let mut trips = Vec::new();
        for (origin, dest) in pairs {
            for charge in 0..levels {
                if let Some(arrival) = scenario.arrival_charge(charge, origin, dest) {
                    trips.push(TripEdge {
                        origin: origin * levels + charge,
                        destination: dest * levels + arrival,
                        origin_region: origin,
                        destination_region: dest,
                    });
                }
            }
        }
        for row in road_time.iter().flatten() {
            max_travel_time = row.iter().copied().fold(max_travel_time, u32::max);
        }

        Self {
            graph,
            spatial_nodes: spatial,
            charge_levels: levels,
            horizon,
            road_time,
            trips,
            max_travel_time,
        }
    }

    pub fn number_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn number_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn spatial_nodes(&self) -> usize {
        self.spatial_nodes
    }

    pub fn charge_levels(&self) -> usize {
        self.charge_levels
    }

    /// Dense id of `(region, charge)`.
    pub fn node_id(&self, region: usize, charge: usize) -> NodeId {
        region * self.charge_levels + charge
    }

    pub fn node(&self, id: NodeId) -> Node {
        self.graph[NodeIndex::new(id)]
    }

    pub fn edge(&self, id: EdgeId) -> &FleetEdge {
        &self.graph[EdgeIndex::new(id)]
    }

    /// `(source, target)` of an edge.
    pub fn endpoints(&self, id: EdgeId) -> (NodeId, NodeId) {
        let (s, t) = self
            .graph
            .edge_endpoints(EdgeIndex::new(id))
            .map(|(s, t)| (s.index(), t.index()))
            .unwrap_or((usize::MAX, usize::MAX));
        (s, t)
    }

    /// Iterates `(edge id, source, target, payload)` in edge-id order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, NodeId, NodeId, &FleetEdge)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.id().index(), e.source().index(), e.target().index(), e.weight()))
    }

    /// Edge ids leaving `node`.
    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.graph
            .edges_directed(NodeIndex::new(node), Direction::Outgoing)
            .map(|e| e.id().index())
    }

    /// Edge ids entering `node`.
    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.graph
            .edges_directed(NodeIndex::new(node), Direction::Incoming)
            .map(|e| e.id().index())
    }

    /// Duration of `edge` when departing at `t`. Times past the horizon reuse the
    /// last tabulated value.
    pub fn travel_time(&self, edge: EdgeId, t: usize) -> u32 {
        let times = &self.edge(edge).travel_time;
        times.get(t).or_else(|| times.last()).copied().unwrap_or(1)
    }

    /// Road travel time between two regions departing at `t`.
    pub fn road_time(&self, origin: usize, destination: usize, t: usize) -> u32 {
        let t = t.min(self.horizon.saturating_sub(1));
        self.road_time[t][origin][destination]
    }

    /// Longest travel time of any edge; bounds how far ahead arrivals are booked.
    pub fn max_travel_time(&self) -> u32 {
        self.max_travel_time
    }

    pub fn trips(&self) -> &[TripEdge] {
        &self.trips
    }

    /// `(sources, targets)` of every edge, for message passing.
    pub fn edge_index(&self) -> (Vec<i64>, Vec<i64>) {
        self.edges()
            .map(|(_, s, t, _)| (s as i64, t as i64))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::scenario::ScenarioBuilder;

    fn two_by_three() -> FleetGraph {
        let s = ScenarioBuilder::new(2, 3, 4)
            .fleet(6)
            .charging_station(0, 2)
            .trip(0, 0, 1, 1.0, 5.0)
            .travel_time(1, 0, 1, 3)
            .build()
            .unwrap();
        FleetGraph::from_scenario(&s)
    }

    #[test]
    fn dense_node_numbering() {
        let g = two_by_three();
        assert_eq!(g.number_nodes(), 6);
        assert_eq!(g.node_id(1, 2), 5);
        assert_eq!(g.node(4), Node { region: 1, charge: 1 });
    }

    #[test]
    fn every_node_has_an_idle_loop() {
        let g = two_by_three();
        for n in 0..g.number_nodes() {
            let idle = g
                .outgoing(n)
                .filter(|&e| g.edge(e).kind == EdgeKind::Idle)
                .count();
            assert_eq!(idle, 1);
            let loop_edge = g.outgoing(n).find(|&e| g.edge(e).kind == EdgeKind::Idle).unwrap();
            assert_eq!(g.endpoints(loop_edge), (n, n));
        }
    }

    #[test]
    fn charging_edges_only_at_stations() {
        let g = two_by_three();
        for (_, s, t, e) in g.edges() {
            if e.kind == EdgeKind::Charge {
                assert_eq!(g.node(s).region, 0);
                assert_eq!(g.node(t).charge, g.node(s).charge + 1);
            }
        }
        let charge_edges = g.edges().filter(|(_, _, _, e)| e.kind == EdgeKind::Charge).count();
        assert_eq!(charge_edges, 2);
    }

    #[test]
    fn road_edges_respect_charge_rule() {
        let g = two_by_three();
        // Region 1 has no charger: only charge 2 can reach it (arriving with 1).
        let into_region_1: Vec<_> = g
            .edges()
            .filter(|(_, s, t, e)| e.kind == EdgeKind::Road && g.node(*s).region == 0 && g.node(*t).region == 1)
            .map(|(_, s, t, _)| (g.node(s).charge, g.node(t).charge))
            .collect();
        assert_eq!(into_region_1, vec![(2, 1)]);
        // Region 0 has a charger: charge 1 may arrive empty.
        let into_region_0 = g
            .edges()
            .filter(|(_, s, t, e)| e.kind == EdgeKind::Road && g.node(*s).region == 1 && g.node(*t).region == 0)
            .count();
        assert_eq!(into_region_0, 2);
    }

    #[test]
    fn travel_time_follows_table() {
        let g = two_by_three();
        let road = g
            .edges()
            .find(|(_, s, t, e)| e.kind == EdgeKind::Road && g.node(*s).region == 0 && g.node(*t).region == 1)
            .map(|(id, _, _, _)| id)
            .unwrap();
        assert_eq!(g.travel_time(road, 0), 1);
        assert_eq!(g.travel_time(road, 1), 3);
        assert_eq!(g.travel_time(road, 99), 1);
        assert_eq!(g.max_travel_time(), 3);
    }

    #[test]
    fn trip_edges_for_demanded_pairs() {
        let g = two_by_three();
        assert_eq!(g.trips().len(), 1);
        let trip = g.trips()[0];
        assert_eq!(trip.origin, g.node_id(0, 2));
        assert_eq!(trip.destination, g.node_id(1, 1));
    }
}
