//! Graph neural networks using tch-rs (PyTorch bindings).
//!
//! Provides the edge-convolution encoder and the actor and critic built on it.
//! This module is only available with the `rl-nn` feature.

use tch::{nn, nn::Module, Device, Kind, Tensor};

use super::distribution::{ActionDistribution, CONCENTRATION_EPS};
use super::observation::GraphObservation;
use super::types::PolicyVariant;
use crate::error::{EamodError, Result};

/// A [`GraphObservation`] moved onto a device.
pub struct GraphTensors {
    /// Node features, `[nodes, node_dim]`.
    pub x: Tensor,
    /// Edge source indices, `[edges]`.
    pub sources: Tensor,
    /// Edge target indices, `[edges]`.
    pub targets: Tensor,
    /// Edge features, `[edges, edge_dim]`.
    pub edges: Tensor,
}

impl GraphTensors {
    /// Converts an observation, checking that its buffers match its declared shape.
    pub fn from_observation(observation: &GraphObservation, device: Device) -> Result<Self> {
        let n = observation.num_nodes;
        let e = observation.num_edges();
        check_len("node features", n * observation.node_dim, observation.node_features.len())?;
        check_len("edge targets", e, observation.edge_targets.len())?;
        check_len("edge features", e * observation.edge_dim, observation.edge_features.len())?;

        Ok(Self {
            x: Tensor::from_slice(&observation.node_features)
                .reshape([n as i64, observation.node_dim as i64])
                .to_device(device),
            sources: Tensor::from_slice(&observation.edge_sources).to_device(device),
            targets: Tensor::from_slice(&observation.edge_targets).to_device(device),
            edges: Tensor::from_slice(&observation.edge_features)
                .reshape([e as i64, observation.edge_dim as i64])
                .to_device(device),
        })
    }

    pub fn num_nodes(&self) -> i64 {
        self.x.size()[0]
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(EamodError::DimensionMismatch { what, expected, found })
    }
}

/// Edge convolution with summed messages.
///
/// Each edge `(i, j)` sends `mlp([x_i, x_j, e_ij])` to its source node `i`.
/// Architecture of the message MLP: `2·node_dim + edge_dim → hidden → hidden`
/// with a ReLU in between.
pub struct GraphEncoder {
    mlp: nn::Sequential,
    hidden: i64,
}

impl GraphEncoder {
    pub fn new(p: &nn::Path, node_dim: usize, edge_dim: usize, hidden: usize) -> Self {
        let input = (2 * node_dim + edge_dim) as i64;
        let hidden = hidden as i64;
        let mlp = nn::seq()
            .add(nn::linear(p / "l1", input, hidden, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "l2", hidden, hidden, Default::default()));
        Self { mlp, hidden }
    }

    /// Returns `[x, aggregated messages]`, shape `[nodes, node_dim + hidden]`.
    pub fn forward(&self, graph: &GraphTensors) -> Tensor {
        let x_i = graph.x.index_select(0, &graph.sources);
        let x_j = graph.x.index_select(0, &graph.targets);
        let messages = self.mlp.forward(&Tensor::cat(&[&x_i, &x_j, &graph.edges], 1));
        let aggregated = Tensor::zeros([graph.num_nodes(), self.hidden], (Kind::Float, graph.x.device()))
            .index_add(0, &graph.sources, &messages);
        Tensor::cat(&[&graph.x, &aggregated], 1)
    }
}

/// Actor producing per-node Dirichlet concentrations, plus a Bernoulli gate
/// per node for the zero-inflated variant.
pub struct GnnActor {
    vs: nn::VarStore,
    encoder: GraphEncoder,
    concentration: nn::Linear,
    gate: nn::Linear,
    variant: PolicyVariant,
}

impl GnnActor {
    pub fn new(node_dim: usize, edge_dim: usize, hidden: usize, variant: PolicyVariant, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let encoder = GraphEncoder::new(&(p / "conv"), node_dim, edge_dim, hidden);
        let width = (node_dim + hidden) as i64;
        let concentration = nn::linear(p / "concentration", width, 1, Default::default());
        let gate = nn::linear(p / "gate", width, 1, Default::default());
        Self {
            vs,
            encoder,
            concentration,
            gate,
            variant,
        }
    }

    /// Forward pass: the action distribution for one observation.
    pub fn forward(&self, graph: &GraphTensors) -> ActionDistribution {
        let h = self.encoder.forward(graph);
        let concentration = self.concentration.forward(&h).squeeze_dim(-1).softplus() + CONCENTRATION_EPS;
        match self.variant {
            PolicyVariant::Dirichlet => ActionDistribution::Dirichlet { concentration },
            PolicyVariant::ZeroInflated => ActionDistribution::ZeroInflated {
                concentration,
                gate: self.gate.forward(&h).squeeze_dim(-1).sigmoid(),
            },
        }
    }

    pub fn variant(&self) -> PolicyVariant {
        self.variant
    }

    /// Returns a mutable reference to the variable store for optimization.
    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    /// Returns a reference to the variable store.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

/// Critic: node embeddings summed over the graph, then a linear readout.
pub struct GnnCritic {
    vs: nn::VarStore,
    encoder: GraphEncoder,
    readout: nn::Linear,
}

impl GnnCritic {
    pub fn new(node_dim: usize, edge_dim: usize, hidden: usize, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let encoder = GraphEncoder::new(&(p / "conv"), node_dim, edge_dim, hidden);
        let readout = nn::linear(p / "readout", (node_dim + hidden) as i64, 1, Default::default());
        Self { vs, encoder, readout }
    }

    /// Forward pass: the scalar state value.
    pub fn forward(&self, graph: &GraphTensors) -> Tensor {
        let pooled = self
            .encoder
            .forward(graph)
            .sum_dim_intlist([0].as_slice(), false, Kind::Float);
        self.readout.forward(&pooled).squeeze_dim(0)
    }

    /// Returns a mutable reference to the variable store for optimization.
    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    /// Returns a reference to the variable store.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}
