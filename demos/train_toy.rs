//! Training demo: the GNN actor-critic on the toy scenario.
//!
//! Trains the zero-inflated Dirichlet policy for a few hundred episodes with
//! LP matching, then compares it with the equal-distribution baseline.
//!
//! Run (requires libtorch):
//! ```sh
//! cargo run --example train_toy --features rl-nn
//! ```

use std::env;

use eamod::algorithms::rl::{
    A2CAgent, ControlConfig, EqualDistributionPolicy, LogTelemetry, TrainingConfig, TrainingOrchestrator,
};
use eamod::fleet::Scenario;
use eamod::flows::SolverEnv;
use tch::Device;

const SCENARIO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/toy_scenario.json");

fn main() -> eamod::Result<()> {
    println!("=== e-AMoD Actor-Critic Training Demo ===\n");

    let episodes: u64 = env::args().nth(1).and_then(|a| a.parse().ok()).unwrap_or(300);
    let scenario = Scenario::from_path(SCENARIO)?;
    let control = ControlConfig {
        policy_horizon: 4,
        checkpoint_dir: Some(env::temp_dir().join("eamod-checkpoints")),
        checkpoint_interval: 100,
        ..ControlConfig::default()
    };
    let training = TrainingConfig::default();
    let solver_env = SolverEnv::shared();

    println!("Training config:");
    println!("  γ: {}", training.gamma);
    println!("  Learning rates: actor={} critic={}", training.lr_actor, training.lr_critic);
    println!("  Variant: {}", training.variant);
    println!("  Episodes: {}", episodes);
    println!();

    let agent = A2CAgent::new(&control, training, Device::cuda_if_available());
    let mut orch = TrainingOrchestrator::from_scenario(
        scenario.clone(),
        solver_env.clone(),
        control.clone(),
        agent,
        EqualDistributionPolicy::new(),
    )?
    .with_telemetry(LogTelemetry);

    let summaries = orch.train(episodes)?;
    for chunk in summaries.chunks(50) {
        let mean = chunk.iter().map(|s| s.reward).sum::<f64>() / chunk.len() as f64;
        println!(
            "  Episodes {:4}-{:4}: mean reward {:.2}",
            chunk[0].episode,
            chunk[chunk.len() - 1].episode,
            mean
        );
    }
    println!("  Best training reward: {:.2}", orch.best_reward());
    println!("  Checkpoints under run {}\n", orch.run_id());

    println!("Evaluating trained policy...");
    println!("{}", orch.evaluate(10)?);

    println!("Evaluating equal-distribution baseline...");
    let mut baseline = TrainingOrchestrator::from_scenario(
        scenario,
        solver_env,
        ControlConfig {
            fixed_distribution_baseline: true,
            ..control
        },
        EqualDistributionPolicy::new(),
        EqualDistributionPolicy::new(),
    )?;
    println!("{}", baseline.evaluate(10)?);

    Ok(())
}
