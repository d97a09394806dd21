//! Episodic advantage actor-critic over the GNN actor and critic.
//!
//! One update per finished episode: discounted, standardized returns; policy
//! loss `Σ −log π · (R − V)` with the value detached, clamped; Huber value
//! loss. Actor and critic step separately, each with its own Adam and
//! gradient clip.

use std::path::Path;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tch::{Device, Kind, Reduction, Tensor};

use super::buffer::TrajectoryBuffer;
use super::checkpoint::CheckpointArchive;
use super::optimizer::Adam;
use super::returns::{discounted_returns, standardize};
use crate::algorithms::rl::config::ControlConfig;
use crate::algorithms::rl::network::{GnnActor, GnnCritic, GraphTensors};
use crate::algorithms::rl::observation::GraphObservation;
use crate::algorithms::rl::policy::{ActionStats, DistributionPolicy, PolicyDecision, UpdateStats};
use crate::algorithms::rl::types::{ActionMode, Learning, PolicyVariant};
use crate::error::{EamodError, Result};

/// Training hyperparameters for the actor-critic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Discount factor γ.
    pub gamma: f64,
    /// Actor learning rate.
    pub lr_actor: f64,
    /// Critic learning rate.
    pub lr_critic: f64,
    /// Maximum actor gradient norm.
    pub max_grad_norm_actor: f64,
    /// Maximum critic gradient norm.
    pub max_grad_norm_critic: f64,
    /// The episode policy loss is clamped to `±policy_loss_clamp`.
    pub policy_loss_clamp: f64,
    /// Width of the message MLP.
    pub hidden_size: usize,
    pub variant: PolicyVariant,
    /// Seeds parameter initialization and action sampling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.97,
            lr_actor: 1e-3,
            lr_critic: 1e-3,
            max_grad_norm_actor: 0.5,
            max_grad_norm_critic: 0.5,
            policy_loss_clamp: 1000.0,
            hidden_size: 32,
            variant: PolicyVariant::ZeroInflated,
            seed: 10,
        }
    }
}

/// What one step leaves for the update.
pub struct StepRecord {
    pub log_prob: Tensor,
    pub value: Tensor,
    pub stats: ActionStats,
}

/// GNN actor-critic implementing [`DistributionPolicy`].
pub struct A2CAgent {
    actor: GnnActor,
    critic: GnnCritic,
    actor_opt: Adam,
    critic_opt: Adam,
    config: TrainingConfig,
    node_dim: usize,
    edge_dim: usize,
    rng: StdRng,
    device: Device,
    name: String,
}

impl A2CAgent {
    /// Creates a new agent.
    ///
    /// # Arguments
    ///
    /// * `control` - Control loop configuration (determines feature dimensions)
    /// * `config` - Training hyperparameters
    /// * `device` - Compute device
    pub fn new(control: &ControlConfig, config: TrainingConfig, device: Device) -> Self {
        tch::manual_seed(config.seed as i64);
        let node_dim = control.node_feature_dim();
        let edge_dim = control.edge_feature_dim();
        let actor = GnnActor::new(node_dim, edge_dim, config.hidden_size, config.variant, device);
        let critic = GnnCritic::new(node_dim, edge_dim, config.hidden_size, device);
        Self {
            actor,
            critic,
            actor_opt: Adam::new(config.lr_actor),
            critic_opt: Adam::new(config.lr_critic),
            rng: StdRng::seed_from_u64(config.seed),
            name: format!("a2c-{}", config.variant),
            config,
            node_dim,
            edge_dim,
            device,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn actor(&self) -> &GnnActor {
        &self.actor
    }

    pub fn critic(&self) -> &GnnCritic {
        &self.critic
    }

    /// Current `(actor, critic)` learning rates.
    pub fn learning_rates(&self) -> (f64, f64) {
        (self.actor_opt.lr(), self.critic_opt.lr())
    }

    /// Multiplies both learning rates; optimizer moments are kept.
    pub fn decay_learning_rate(&mut self, scale_actor: f64, scale_critic: f64) {
        self.actor_opt.set_lr(self.actor_opt.lr() * scale_actor);
        self.critic_opt.set_lr(self.critic_opt.lr() * scale_critic);
        info!(
            "decayed learning rates to actor={:.3e} critic={:.3e}",
            self.actor_opt.lr(),
            self.critic_opt.lr()
        );
    }

    /// Restores parameters and both optimizer states from an archive written
    /// by [`DistributionPolicy::save_checkpoint`].
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let archive = CheckpointArchive::load(path)?;
        archive.restore_var_store("actor", self.actor.var_store_mut())?;
        archive.restore_var_store("critic", self.critic.var_store_mut())?;
        self.actor_opt.load_named_state("actor_opt", archive.tensors())?;
        self.critic_opt.load_named_state("critic_opt", archive.tensors())?;
        info!("loaded checkpoint {}", path.display());
        Ok(())
    }

    fn forward(&mut self, observation: &GraphObservation, mode: ActionMode) -> Result<(PolicyDecision<StepRecord>, StepRecord)> {
        let graph = GraphTensors::from_observation(observation, self.device)?;
        let dist = self.actor.forward(&graph);
        let value = self.critic.forward(&graph);
        let action = match mode {
            ActionMode::Sample => dist.sample(&mut self.rng)?,
            ActionMode::Mean => dist.mean()?,
        };
        let (concentration_mean, concentration_std) = dist.concentration_stats(&action.active)?;
        let stats = ActionStats {
            concentration_mean,
            concentration_std,
            value: value.double_value(&[]),
            log_prob: action.log_prob.double_value(&[]),
        };
        let record = StepRecord {
            log_prob: action.log_prob,
            value,
            stats,
        };
        Ok((
            PolicyDecision {
                shares: action.shares,
                saved: None,
                stats: Some(stats),
            },
            record,
        ))
    }

    fn check_dims(&self, observation: &GraphObservation) -> Result<()> {
        if observation.node_dim != self.node_dim {
            return Err(EamodError::DimensionMismatch {
                what: "node features",
                expected: self.node_dim,
                found: observation.node_dim,
            });
        }
        if observation.edge_dim != self.edge_dim {
            return Err(EamodError::DimensionMismatch {
                what: "edge features",
                expected: self.edge_dim,
                found: observation.edge_dim,
            });
        }
        Ok(())
    }

    /// One actor-critic update on a finished episode.
    fn training_step(&mut self, records: Vec<StepRecord>, rewards: &[f64]) -> UpdateStats {
        let mut returns = discounted_returns(rewards, self.config.gamma);
        standardize(&mut returns);

        let mut policy_terms = Vec::with_capacity(records.len());
        let mut values = Vec::with_capacity(records.len());
        for (record, &ret) in records.iter().zip(&returns) {
            let advantage = ret - record.stats.value;
            policy_terms.push(-&record.log_prob * advantage);
            values.push(record.value.shallow_clone());
        }
        let clamp = self.config.policy_loss_clamp;
        let policy_loss = Tensor::stack(&policy_terms, 0).sum(Kind::Float).clamp(-clamp, clamp);
        let targets: Vec<f32> = returns.iter().map(|&r| r as f32).collect();
        let targets = Tensor::from_slice(&targets).to_device(self.device);
        let value_loss = Tensor::stack(&values, 0).smooth_l1_loss(&targets, Reduction::Sum, 1.0);

        self.actor_opt.zero_grad(self.actor.var_store());
        policy_loss.backward();
        self.actor_opt
            .clip_grad_norm(self.actor.var_store(), self.config.max_grad_norm_actor);
        self.actor_opt.step(self.actor.var_store());

        self.critic_opt.zero_grad(self.critic.var_store());
        value_loss.backward();
        self.critic_opt
            .clip_grad_norm(self.critic.var_store(), self.config.max_grad_norm_critic);
        self.critic_opt.step(self.critic.var_store());

        let n = records.len().max(1) as f64;
        let mean = |f: fn(&ActionStats) -> f64| records.iter().map(|r| f(&r.stats)).sum::<f64>() / n;
        let mean_log_prob = mean(|s| s.log_prob);
        let std_log_prob = if records.len() > 1 {
            (records
                .iter()
                .map(|r| (r.stats.log_prob - mean_log_prob).powi(2))
                .sum::<f64>()
                / (n - 1.0))
                .sqrt()
        } else {
            0.0
        };
        let stats = UpdateStats {
            policy_loss: policy_loss.double_value(&[]),
            value_loss: value_loss.double_value(&[]),
            mean_value: mean(|s| s.value),
            mean_concentration: mean(|s| s.concentration_mean),
            mean_concentration_std: mean(|s| s.concentration_std),
            mean_log_prob,
            std_log_prob,
        };
        debug!(
            "a2c update over {} steps: policy_loss={:.4} value_loss={:.4}",
            records.len(),
            stats.policy_loss,
            stats.value_loss
        );
        stats
    }
}

impl DistributionPolicy for A2CAgent {
    type Saved = StepRecord;

    fn act(
        &mut self,
        observation: &GraphObservation,
        mode: ActionMode,
        learning: Learning,
    ) -> Result<PolicyDecision<StepRecord>> {
        self.check_dims(observation)?;
        if learning.is_enabled() {
            let (mut decision, record) = self.forward(observation, mode)?;
            decision.saved = Some(record);
            Ok(decision)
        } else {
            let (decision, _) = tch::no_grad(|| self.forward(observation, mode))?;
            Ok(decision)
        }
    }

    fn update(&mut self, trajectory: &mut TrajectoryBuffer<StepRecord>, learning: Learning) -> Result<Option<UpdateStats>> {
        if !learning.is_enabled() || trajectory.is_empty() {
            trajectory.clear();
            return Ok(None);
        }
        let (records, rewards) = trajectory.drain();
        Ok(Some(self.training_step(records, &rewards)))
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let mut archive = CheckpointArchive::new();
        archive.push_var_store("actor", self.actor.var_store());
        archive.push_var_store("critic", self.critic.var_store());
        archive.extend(self.actor_opt.named_state("actor_opt"));
        archive.extend(self.critic_opt.named_state("critic_opt"));
        archive.save(path)?;
        debug!("wrote {} tensors to {}", archive.len(), path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::rl::observation::ObservationBuilder;
    use crate::algorithms::rl::orchestrator::TrainingOrchestrator;
    use crate::algorithms::rl::policy::EqualDistributionPolicy;
    use crate::fleet::{ScenarioBuilder, StateModel};
    use crate::flows::SolverEnv;

    fn control() -> ControlConfig {
        ControlConfig {
            policy_horizon: 2,
            ..ControlConfig::default()
        }
    }

    fn state() -> StateModel {
        let scenario = ScenarioBuilder::new(2, 3, 4)
            .place(0, 2, 4)
            .place(1, 2, 4)
            .charging_station(1, 2)
            .trip(0, 0, 1, 2.0, 10.0)
            .trip(1, 1, 0, 2.0, 10.0)
            .trip(2, 0, 1, 1.0, 8.0)
            .build()
            .unwrap();
        StateModel::new(scenario, 5).unwrap()
    }

    fn agent(variant: PolicyVariant, seed: u64) -> A2CAgent {
        let config = TrainingConfig {
            hidden_size: 8,
            variant,
            seed,
            ..TrainingConfig::default()
        };
        A2CAgent::new(&control(), config, Device::Cpu)
    }

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("eamod-a2c-{}.ckpt", crate::generate_id()))
    }

    #[test]
    fn frozen_act_saves_nothing() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &control());
        let mut agent = agent(PolicyVariant::Dirichlet, 1);
        let decision = agent.act(&obs, ActionMode::Mean, Learning::Frozen).unwrap();
        assert!(decision.saved.is_none());
        assert_eq!(decision.shares.len(), obs.num_nodes);
        assert!((decision.shares.iter().sum::<f64>() - 1.0).abs() < 1e-4);
        assert!(decision.stats.is_some());
    }

    #[test]
    fn mean_action_is_deterministic_for_both_variants() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &control());
        for variant in [PolicyVariant::Dirichlet, PolicyVariant::ZeroInflated] {
            let mut agent = agent(variant, 6);
            let first = agent.act(&obs, ActionMode::Mean, Learning::Frozen).unwrap();
            // A stochastic draw in between advances the sampling stream.
            agent.act(&obs, ActionMode::Sample, Learning::Frozen).unwrap();
            let second = agent.act(&obs, ActionMode::Mean, Learning::Frozen).unwrap();
            assert_eq!(first.shares, second.shares, "{:?}", variant);
            assert!(first.shares.iter().all(|&s| s > 0.0), "{:?}", variant);
        }
    }

    #[test]
    fn learning_act_saves_a_differentiable_record() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &control());
        let mut agent = agent(PolicyVariant::ZeroInflated, 2);
        let decision = agent.act(&obs, ActionMode::Sample, Learning::LearningEnabled).unwrap();
        let record = decision.saved.unwrap();
        assert!(record.log_prob.requires_grad());
        assert!(record.value.requires_grad());
    }

    #[test]
    fn wrong_feature_width_is_rejected() {
        let state = state();
        let obs = ObservationBuilder::build(
            &state,
            &ControlConfig {
                policy_horizon: 3,
                ..ControlConfig::default()
            },
        );
        let mut agent = agent(PolicyVariant::Dirichlet, 1);
        assert!(matches!(
            agent.act(&obs, ActionMode::Mean, Learning::Frozen),
            Err(EamodError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn update_changes_parameters_and_clears_the_buffer() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &control());
        let mut agent = agent(PolicyVariant::Dirichlet, 3);
        let before: Vec<Tensor> = agent
            .actor()
            .var_store()
            .trainable_variables()
            .iter()
            .map(|v| v.detach().copy())
            .collect();

        let mut buffer = TrajectoryBuffer::new();
        for reward in [1.0, -2.0, 4.0] {
            let decision = agent.act(&obs, ActionMode::Sample, Learning::LearningEnabled).unwrap();
            buffer.push(decision.saved.unwrap(), reward);
        }
        let stats = agent.update(&mut buffer, Learning::LearningEnabled).unwrap().unwrap();
        assert!(buffer.is_empty());
        assert!(stats.policy_loss.abs() <= 1000.0);
        assert!(stats.value_loss >= 0.0);

        let after = agent.actor().var_store().trainable_variables();
        assert!(before.iter().zip(&after).any(|(b, a)| !b.equal(&a.detach())));
    }

    #[test]
    fn frozen_update_is_a_no_op() {
        let mut agent = agent(PolicyVariant::Dirichlet, 3);
        let mut buffer = TrajectoryBuffer::new();
        assert!(agent.update(&mut buffer, Learning::Frozen).unwrap().is_none());
    }

    #[test]
    fn decay_scales_learning_rates() {
        let mut agent = agent(PolicyVariant::Dirichlet, 1);
        agent.decay_learning_rate(0.5, 0.1);
        let (a, c) = agent.learning_rates();
        assert!((a - 5e-4).abs() < 1e-12);
        assert!((c - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn checkpoint_restores_parameters_and_optimizer_state() {
        let state = state();
        let obs = ObservationBuilder::build(&state, &control());
        let mut trained = agent(PolicyVariant::ZeroInflated, 4);
        let mut buffer = TrajectoryBuffer::new();
        for reward in [3.0, 1.0] {
            let decision = trained.act(&obs, ActionMode::Sample, Learning::LearningEnabled).unwrap();
            buffer.push(decision.saved.unwrap(), reward);
        }
        trained.update(&mut buffer, Learning::LearningEnabled).unwrap();
        trained.decay_learning_rate(0.5, 0.5);

        let path = temp_path();
        trained.save_checkpoint(&path).unwrap();
        let mut restored = agent(PolicyVariant::ZeroInflated, 99);
        restored.load_checkpoint(&path).unwrap();

        assert_eq!(restored.learning_rates(), trained.learning_rates());
        assert_eq!(restored.actor_opt.steps(), 1);
        let original = trained.actor().var_store().variables();
        for (name, var) in restored.actor().var_store().variables() {
            assert!(var.equal(&original[&name]), "{} differs", name);
        }
        let original = trained.critic().var_store().variables();
        for (name, var) in restored.critic().var_store().variables() {
            assert!(var.equal(&original[&name]), "{} differs", name);
        }
        let saved: Vec<_> = trained.actor_opt.named_state("a");
        let loaded: std::collections::HashMap<_, _> = restored.actor_opt.named_state("a").into_iter().collect();
        for (key, tensor) in saved {
            assert!(tensor.equal(&loaded[&key]), "{} differs", key);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn trains_inside_the_control_loop() {
        let mut orch = TrainingOrchestrator::new(
            state(),
            SolverEnv::shared(),
            control(),
            agent(PolicyVariant::ZeroInflated, 7),
            EqualDistributionPolicy::new(),
        );
        let summaries = orch.train(2).unwrap();
        assert!(summaries.iter().all(|s| s.update.is_some()));
        orch.state().check_conservation().unwrap();
        let metrics = orch.evaluate(1).unwrap();
        assert_eq!(metrics.n_episodes, 1);
    }
}
