//! Evaluation metrics.
//!
//! Aggregates episode summaries of deterministic, frozen evaluation runs.

use std::fmt;
use std::time::Duration;

use super::orchestrator::EpisodeSummary;

/// Aggregated evaluation metrics over multiple episodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationMetrics {
    /// Mean episode reward.
    pub mean_reward: f64,
    /// Standard deviation of the episode reward.
    pub std_reward: f64,
    /// Mean trips served per episode.
    pub mean_served_demand: f64,
    /// Mean empty-repositioning cost per episode.
    pub mean_rebalancing_cost: f64,
    /// Mean electricity cost per episode.
    pub mean_charging_cost: f64,
    /// Wall-clock time of the whole evaluation.
    pub wall_time: Duration,
    /// Number of episodes evaluated.
    pub n_episodes: usize,
}

impl EvaluationMetrics {
    /// Aggregates finished episodes. Empty input yields all-zero metrics.
    pub fn from_summaries(summaries: &[EpisodeSummary], wall_time: Duration) -> Self {
        let n = summaries.len().max(1) as f64;
        let mean = |f: fn(&EpisodeSummary) -> f64| summaries.iter().map(f).sum::<f64>() / n;
        let mean_reward = mean(|s| s.reward);
        let std_reward = (summaries
            .iter()
            .map(|s| (s.reward - mean_reward).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        Self {
            mean_reward,
            std_reward,
            mean_served_demand: mean(|s| s.served_demand as f64),
            mean_rebalancing_cost: mean(|s| s.rebalancing_cost),
            mean_charging_cost: mean(|s| s.charging_cost),
            wall_time,
            n_episodes: summaries.len(),
        }
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== Evaluation Metrics ({} episodes) ===",
            self.n_episodes
        )?;
        writeln!(
            f,
            "  Mean reward:             {:.2} ± {:.2}",
            self.mean_reward, self.std_reward
        )?;
        writeln!(
            f,
            "  Mean served demand:      {:.1}",
            self.mean_served_demand
        )?;
        writeln!(
            f,
            "  Mean rebalancing cost:   {:.2}",
            self.mean_rebalancing_cost
        )?;
        writeln!(
            f,
            "  Mean charging cost:      {:.2}",
            self.mean_charging_cost
        )?;
        writeln!(
            f,
            "  Wall time:               {:.2}s",
            self.wall_time.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::rl::types::MatchingMode;

    fn summary(reward: f64, served: i64) -> EpisodeSummary {
        EpisodeSummary {
            episode: 0,
            reward,
            served_demand: served,
            rebalancing_cost: 1.0,
            charging_cost: 0.5,
            matching: MatchingMode::Optimization,
            desired: Default::default(),
            update: None,
            matching_update: None,
        }
    }

    #[test]
    fn aggregates_means_and_spread() {
        let m = EvaluationMetrics::from_summaries(&[summary(10.0, 4), summary(20.0, 6)], Duration::from_secs(1));
        assert_eq!(m.n_episodes, 2);
        assert!((m.mean_reward - 15.0).abs() < 1e-12);
        assert!((m.std_reward - 5.0).abs() < 1e-12);
        assert!((m.mean_served_demand - 5.0).abs() < 1e-12);
        assert!(m.to_string().contains("2 episodes"));
    }

    #[test]
    fn empty_input_is_zero() {
        let m = EvaluationMetrics::from_summaries(&[], Duration::ZERO);
        assert_eq!(m.n_episodes, 0);
        assert_eq!(m.mean_reward, 0.0);
    }
}
