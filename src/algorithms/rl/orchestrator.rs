//! The per-episode control loop.
//!
//! ```text
//! reset → { passenger phase → policy phase → rebalancing phase } × horizon → update
//! ```
//!
//! Below `matching_switch_episode` the passenger phase is the matching LP;
//! from then on it is derived from the matching policy. The rebalancing phase
//! always follows the distribution policy through the rebalancing LP. Both LP
//! solvers are built on the first timestep and updated in place afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use super::config::ControlConfig;
use super::desired::DesiredAccumulation;
use super::matching::derive_passenger_flow;
use super::metrics::EvaluationMetrics;
use super::observation::ObservationBuilder;
use super::policy::{ActionStats, DistributionPolicy, UpdateStats};
use super::telemetry::{NullTelemetry, TelemetrySink};
use super::training::buffer::TrajectoryBuffer;
use super::types::{ActionMode, EpisodeMode, Learning, MatchingMode};
use crate::error::Result;
use crate::fleet::{Scenario, StateModel};
use crate::flows::{PassengerFlow, PassengerFlowSolver, RebalancingFlow, RebalancingFlowSolver, SolverEnv};
use crate::{generate_id, Id};

/// What one episode produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    /// Training episodes completed before this one.
    pub episode: u64,
    pub reward: f64,
    pub served_demand: i64,
    pub rebalancing_cost: f64,
    pub charging_cost: f64,
    pub matching: MatchingMode,
    /// Desired accumulation per node, keyed by the timestep that produced it.
    pub desired: BTreeMap<usize, Vec<i64>>,
    /// Rebalancing policy update, if one ran.
    pub update: Option<UpdateStats>,
    /// Matching policy update, if one ran.
    pub matching_update: Option<UpdateStats>,
}

/// Learning flags of one episode, decided once before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EpisodePlan {
    matching: MatchingMode,
    action_mode: ActionMode,
    random_demand: bool,
    rebalancing: Learning,
    matching_learning: Learning,
}

/// Drives episodes of the three-phase control loop.
///
/// # Type Parameters
///
/// * `P` - Rebalancing distribution policy
/// * `M` - Matching policy, consulted after the curriculum switch
/// * `T` - Telemetry sink
pub struct TrainingOrchestrator<P, M, T = NullTelemetry>
where
    P: DistributionPolicy,
    M: DistributionPolicy,
    T: TelemetrySink,
{
    state: StateModel,
    env: Arc<SolverEnv>,
    config: ControlConfig,
    policy: P,
    matching_policy: M,
    telemetry: T,
    passenger_solver: Option<PassengerFlowSolver>,
    rebalancing_solver: Option<RebalancingFlowSolver>,
    trajectory: TrajectoryBuffer<P::Saved>,
    matching_trajectory: TrajectoryBuffer<M::Saved>,
    episode: u64,
    best_reward: f64,
    run_id: Id,
}

impl<P, M> TrainingOrchestrator<P, M, NullTelemetry>
where
    P: DistributionPolicy,
    M: DistributionPolicy,
{
    /// Creates an orchestrator without telemetry.
    ///
    /// # Arguments
    ///
    /// * `state` - Simulated world, already seeded
    /// * `env` - Solver environment shared by both flow problems
    /// * `config` - Control loop configuration
    /// * `policy` - Rebalancing policy
    /// * `matching_policy` - Policy used for passenger matching after the switch
    pub fn new(state: StateModel, env: Arc<SolverEnv>, config: ControlConfig, policy: P, matching_policy: M) -> Self {
        Self {
            state,
            env,
            config,
            policy,
            matching_policy,
            telemetry: NullTelemetry,
            passenger_solver: None,
            rebalancing_solver: None,
            trajectory: TrajectoryBuffer::new(),
            matching_trajectory: TrajectoryBuffer::new(),
            episode: 0,
            best_reward: f64::NEG_INFINITY,
            run_id: generate_id(),
        }
    }

    /// Creates an orchestrator over a fresh world seeded with `config.seed`.
    pub fn from_scenario(
        scenario: Scenario,
        env: Arc<SolverEnv>,
        config: ControlConfig,
        policy: P,
        matching_policy: M,
    ) -> Result<Self> {
        let state = StateModel::new(scenario, config.seed)?;
        Ok(Self::new(state, env, config, policy, matching_policy))
    }
}

impl<P, M, T> TrainingOrchestrator<P, M, T>
where
    P: DistributionPolicy,
    M: DistributionPolicy,
    T: TelemetrySink,
{
    /// Replaces the telemetry sink.
    pub fn with_telemetry<U: TelemetrySink>(self, telemetry: U) -> TrainingOrchestrator<P, M, U> {
        TrainingOrchestrator {
            state: self.state,
            env: self.env,
            config: self.config,
            policy: self.policy,
            matching_policy: self.matching_policy,
            telemetry,
            passenger_solver: self.passenger_solver,
            rebalancing_solver: self.rebalancing_solver,
            trajectory: self.trajectory,
            matching_trajectory: self.matching_trajectory,
            episode: self.episode,
            best_reward: self.best_reward,
            run_id: self.run_id,
        }
    }

    pub fn state(&self) -> &StateModel {
        &self.state
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn matching_policy(&self) -> &M {
        &self.matching_policy
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    /// Training episodes completed so far.
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Sets the training episode counter, e.g. when resuming from a checkpoint.
    pub fn set_episode(&mut self, episode: u64) {
        self.episode = episode;
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn best_reward(&self) -> f64 {
        self.best_reward
    }

    /// Passenger matching source for the next training episode.
    pub fn matching_mode(&self) -> MatchingMode {
        if self.episode >= self.config.matching_switch_episode {
            MatchingMode::Learned
        } else {
            MatchingMode::Optimization
        }
    }

    fn plan(&self, mode: EpisodeMode) -> EpisodePlan {
        let training = mode == EpisodeMode::Training;
        let matching = self.matching_mode();
        let learned = matching == MatchingMode::Learned;
        let baseline = self.config.fixed_distribution_baseline;
        EpisodePlan {
            matching,
            action_mode: if training { ActionMode::Sample } else { ActionMode::Mean },
            random_demand: training,
            rebalancing: Learning::from_flag(
                training && !baseline && !(learned && self.config.freeze_rebalancing_after_switch),
            ),
            matching_learning: Learning::from_flag(
                training && !baseline && learned && self.config.train_matching_policy,
            ),
        }
    }

    /// Runs one full episode and, for training episodes, the policy updates,
    /// telemetry and checkpoints that follow it.
    ///
    /// Conservation, balance and solver errors abort the episode and are
    /// returned unchanged.
    pub fn run_episode(&mut self, mode: EpisodeMode) -> Result<EpisodeSummary> {
        let plan = self.plan(mode);
        self.state.reset(plan.random_demand);
        self.trajectory.clear();
        self.matching_trajectory.clear();

        let mut summary = EpisodeSummary {
            episode: self.episode,
            reward: 0.0,
            served_demand: 0,
            rebalancing_cost: 0.0,
            charging_cost: 0.0,
            matching: plan.matching,
            desired: BTreeMap::new(),
            update: None,
            matching_update: None,
        };
        let mut action_stats = Vec::new();

        loop {
            let t = self.state.time();

            // Passenger phase.
            let (flow, matching_saved) = match plan.matching {
                MatchingMode::Optimization => (self.solve_passenger_flow()?, None),
                MatchingMode::Learned => {
                    let observation = ObservationBuilder::build(&self.state, &self.config);
                    let decision = self
                        .matching_policy
                        .act(&observation, plan.action_mode, plan.matching_learning)?;
                    (derive_passenger_flow(&self.state, &decision.shares)?, decision.saved)
                }
            };
            let passenger = self.state.apply_passenger_step(&flow)?;

            // Policy phase.
            let observation = ObservationBuilder::build(&self.state, &self.config);
            let decision = self.policy.act(&observation, plan.action_mode, plan.rebalancing)?;
            if let Some(stats) = decision.stats {
                action_stats.push(stats);
            }
            let desired = DesiredAccumulation::from_shares(&decision.shares, observation.total_idle(), t + 1)?;

            // Rebalancing phase.
            let rebalancing_flow = self.solve_rebalancing_flow(desired.counts())?;
            let rebalancing = self.state.apply_rebalancing_step(&rebalancing_flow)?;

            let reward = passenger.reward + rebalancing.reward;
            if let Some(saved) = decision.saved {
                self.trajectory.push(saved, reward);
            }
            if let Some(saved) = matching_saved {
                self.matching_trajectory.push(saved, reward);
            }
            summary.reward += reward;
            summary.served_demand += passenger.info.served_demand;
            summary.rebalancing_cost += rebalancing.info.rebalancing_cost;
            summary.charging_cost += rebalancing.info.charging_cost;
            summary.desired.insert(t, desired.into_counts());
            debug!(
                "t={}: reward {:.2}, served {}, moved {}",
                t,
                reward,
                passenger.info.served_demand,
                rebalancing_flow.moved_vehicles(self.state.graph())
            );

            if rebalancing.done {
                break;
            }
        }

        if plan.rebalancing.is_enabled() {
            summary.update = self.policy.update(&mut self.trajectory, plan.rebalancing)?;
        }
        self.trajectory.clear();
        if plan.matching_learning.is_enabled() {
            summary.matching_update = self
                .matching_policy
                .update(&mut self.matching_trajectory, plan.matching_learning)?;
        }
        self.matching_trajectory.clear();

        self.record_telemetry(mode, &summary, &action_stats);
        if mode == EpisodeMode::Training {
            self.episode += 1;
            self.checkpoint_after_episode(&summary)?;
        }
        Ok(summary)
    }

    /// Runs `episodes` training episodes and writes the final checkpoint.
    pub fn train(&mut self, episodes: u64) -> Result<Vec<EpisodeSummary>> {
        let mut summaries = Vec::with_capacity(episodes as usize);
        for i in 0..episodes {
            let summary = self.run_episode(EpisodeMode::Training)?;
            if i % 10 == 0 || i + 1 == episodes {
                info!(
                    "[Episode {}/{}] reward={:.2} served={} reb_cost={:.2} charge_cost={:.2} matching={} policy={}",
                    i + 1,
                    episodes,
                    summary.reward,
                    summary.served_demand,
                    summary.rebalancing_cost,
                    summary.charging_cost,
                    summary.matching,
                    self.policy.name()
                );
            }
            summaries.push(summary);
        }
        if let Some(path) = self.checkpoint_path("final.ckpt")? {
            self.policy.save_checkpoint(&path)?;
            info!("saved final checkpoint to {}", path.display());
        }
        Ok(summaries)
    }

    /// Runs `episodes` frozen evaluation episodes (expected demand, mean actions).
    pub fn evaluate(&mut self, episodes: usize) -> Result<EvaluationMetrics> {
        let start = Instant::now();
        let mut summaries = Vec::with_capacity(episodes);
        for _ in 0..episodes {
            summaries.push(self.run_episode(EpisodeMode::Evaluation)?);
        }
        let metrics = EvaluationMetrics::from_summaries(&summaries, start.elapsed());
        info!("evaluation of {}: mean reward {:.2}", self.policy.name(), metrics.mean_reward);
        Ok(metrics)
    }

    fn solve_passenger_flow(&mut self) -> Result<PassengerFlow> {
        let mut solver = match self.passenger_solver.take() {
            Some(mut solver) => {
                solver.update_constraints(&self.state);
                solver.update_objective(&self.state);
                solver
            }
            None => PassengerFlowSolver::new(self.env.clone(), &self.state),
        };
        let flow = solver.optimize();
        self.passenger_solver = Some(solver);
        flow
    }

    fn solve_rebalancing_flow(&mut self, desired: &[i64]) -> Result<RebalancingFlow> {
        let mut solver = match self.rebalancing_solver.take() {
            Some(mut solver) => {
                solver.update_constraints(desired, &self.state)?;
                solver.update_objective(&self.state);
                solver
            }
            None => RebalancingFlowSolver::new(self.env.clone(), &self.state, desired)?,
        };
        let flow = solver.optimize();
        self.rebalancing_solver = Some(solver);
        flow
    }

    fn record_telemetry(&mut self, mode: EpisodeMode, summary: &EpisodeSummary, action_stats: &[ActionStats]) {
        let step = summary.episode;
        let prefix = match mode {
            EpisodeMode::Training => "episode",
            EpisodeMode::Evaluation => "eval",
        };
        let sink = &mut self.telemetry;
        sink.record(&format!("{}/reward", prefix), summary.reward, step);
        sink.record(&format!("{}/served_demand", prefix), summary.served_demand as f64, step);
        sink.record(&format!("{}/rebalancing_cost", prefix), summary.rebalancing_cost, step);
        sink.record(&format!("{}/charging_cost", prefix), summary.charging_cost, step);

        if let Some(update) = &summary.update {
            sink.record("train/policy_loss", update.policy_loss, step);
            sink.record("train/value_loss", update.value_loss, step);
            sink.record("train/mean_value", update.mean_value, step);
            sink.record("train/mean_concentration", update.mean_concentration, step);
            sink.record("train/std_concentration", update.mean_concentration_std, step);
            sink.record("train/mean_log_prob", update.mean_log_prob, step);
            sink.record("train/std_log_prob", update.std_log_prob, step);
        }
        if let Some(update) = &summary.matching_update {
            sink.record("train/matching_policy_loss", update.policy_loss, step);
            sink.record("train/matching_value_loss", update.value_loss, step);
        }
        if !action_stats.is_empty() {
            let n = action_stats.len() as f64;
            let mean = |f: fn(&ActionStats) -> f64| action_stats.iter().map(f).sum::<f64>() / n;
            sink.record("policy/concentration_mean", mean(|s| s.concentration_mean), step);
            sink.record("policy/concentration_std", mean(|s| s.concentration_std), step);
            sink.record("policy/value", mean(|s| s.value), step);
            sink.record("policy/log_prob", mean(|s| s.log_prob), step);
        }

        let levels = self.state.graph().charge_levels().max(1);
        let steps = summary.desired.len().max(1) as f64;
        let mut regional = vec![0.0; self.state.graph().spatial_nodes()];
        for counts in summary.desired.values() {
            for (node, &count) in counts.iter().enumerate() {
                regional[node / levels] += count as f64 / steps;
            }
        }
        for (region, value) in regional.iter().enumerate() {
            sink.record(&format!("desired/region_{}", region), *value, step);
        }
        for (region, value) in self.state.demand_model().total_by_origin().iter().enumerate() {
            sink.record(&format!("demand/region_{}", region), *value, step);
        }
    }

    fn checkpoint_path(&self, file: &str) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.config.checkpoint_dir else {
            return Ok(None);
        };
        let dir = dir.join(&self.run_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Some(dir.join(file)))
    }

    fn checkpoint_after_episode(&mut self, summary: &EpisodeSummary) -> Result<()> {
        if summary.reward > self.best_reward {
            self.best_reward = summary.reward;
            if let Some(path) = self.checkpoint_path("best.ckpt")? {
                self.policy.save_checkpoint(&path)?;
                info!(
                    "episode {}: new best reward {:.2}, saved {}",
                    summary.episode,
                    summary.reward,
                    path.display()
                );
            }
        }
        let interval = self.config.checkpoint_interval;
        if interval > 0 && self.episode % interval == 0 {
            if let Some(path) = self.checkpoint_path(&format!("episode_{}.ckpt", self.episode))? {
                self.policy.save_checkpoint(&path)?;
                info!("saved periodic checkpoint {}", path.display());
            }
        }
        Ok(())
    }
}
