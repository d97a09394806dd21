//! Baseline demo: fixed distribution policies on the toy scenario.
//!
//! Evaluates the equal-distribution and hold-position baselines through the
//! full control loop (matching LP, policy, rebalancing LP) and prints one
//! detailed episode.
//!
//! Run:
//! ```sh
//! cargo run --example baseline_toy
//! ```

use eamod::algorithms::rl::{
    ControlConfig, EpisodeMode, EqualDistributionPolicy, HoldPositionPolicy, TrainingOrchestrator,
};
use eamod::fleet::Scenario;
use eamod::flows::SolverEnv;

const SCENARIO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/toy_scenario.json");

fn main() -> eamod::Result<()> {
    println!("=== e-AMoD Baseline Demo ===\n");

    let scenario = Scenario::from_path(SCENARIO)?;
    println!("Scenario:");
    println!(
        "  Regions: {}, charge levels: {}",
        scenario.spatial_nodes, scenario.number_charge_levels
    );
    println!("  Fleet: {} vehicles", scenario.total_acc);
    println!(
        "  Horizon: {} steps of {} h",
        scenario.episode_length, scenario.time_granularity
    );
    println!();

    let config = ControlConfig {
        fixed_distribution_baseline: true,
        ..ControlConfig::default()
    };
    let env = SolverEnv::shared();

    // --- Equal distribution ---
    println!("Evaluating equal-distribution policy...");
    let mut equal = TrainingOrchestrator::from_scenario(
        scenario.clone(),
        env.clone(),
        config.clone(),
        EqualDistributionPolicy::new(),
        EqualDistributionPolicy::new(),
    )?;
    println!("{}", equal.evaluate(5)?);

    // --- Hold position ---
    println!("Evaluating hold-position policy...");
    let mut hold = TrainingOrchestrator::from_scenario(
        scenario,
        env.clone(),
        config,
        HoldPositionPolicy::new(),
        EqualDistributionPolicy::new(),
    )?;
    println!("{}", hold.evaluate(5)?);

    // --- One episode in detail ---
    println!("--- Detailed Single Episode (Equal) ---\n");
    let summary = equal.run_episode(EpisodeMode::Evaluation)?;
    let stats = equal.state().stats();
    for (t, desired) in &summary.desired {
        println!(
            "  Step {:2}: idle={:?} passenger={:?} rebalancing={:?} charging={:?} desired_total={}",
            t,
            stats.idle[*t],
            stats.passenger[*t],
            stats.rebalancing[*t],
            stats.charging[*t],
            desired.iter().sum::<i64>()
        );
    }
    println!(
        "\n  Episode reward {:.2}, served {}, rebalancing cost {:.2}, charging cost {:.2}",
        summary.reward, summary.served_demand, summary.rebalancing_cost, summary.charging_cost
    );
    println!("  LP solves so far: {}", env.solves());

    Ok(())
}
