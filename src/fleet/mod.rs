//! Fleet domain: scenario document, state graph, demand and the simulated state.

pub mod demand;
pub mod graph;
pub mod scenario;
pub mod state;

pub use demand::DemandModel;
pub use graph::{EdgeId, EdgeKind, FleetEdge, FleetGraph, Node, NodeId, TripEdge};
pub use scenario::{Scenario, ScenarioBuilder};
pub use state::{SpatialStats, StateModel, StateObservation, StepInfo, StepOutcome};
