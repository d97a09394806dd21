//! Conversion of policy shares into an integer target distribution.

use crate::error::{EamodError, Result};

/// Integer vehicle target per node for the next state.
///
/// Always sums to the idle fleet it was built from and is never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAccumulation {
    counts: Vec<i64>,
}

impl DesiredAccumulation {
    /// Scales `shares` to `total_idle` vehicles.
    ///
    /// Non-finite or negative shares count as zero and an all-zero vector
    /// becomes uniform. Each node receives its truncated share of the fleet and
    /// the rounding remainder goes to the node with the largest share (lowest
    /// id on ties).
    ///
    /// # Arguments
    ///
    /// * `shares` - Per-node policy output
    /// * `total_idle` - Vehicles to distribute
    /// * `time` - Timestep, for error reporting
    pub fn from_shares(shares: &[f64], total_idle: i64, time: usize) -> Result<Self> {
        if shares.is_empty() {
            return Err(EamodError::DimensionMismatch {
                what: "policy shares",
                expected: 1,
                found: 0,
            });
        }
        let mut clean: Vec<f64> = shares
            .iter()
            .map(|&s| if s.is_finite() && s > 0.0 { s } else { 0.0 })
            .collect();
        let mut sum: f64 = clean.iter().sum();
        if !(sum > 0.0 && sum.is_finite()) {
            clean.iter_mut().for_each(|s| *s = 1.0);
            sum = clean.len() as f64;
        }

        let mut counts: Vec<i64> = clean
            .iter()
            .map(|s| (s * total_idle as f64 / sum).floor().max(0.0) as i64)
            .collect();
        let argmax = clean
            .iter()
            .enumerate()
            .fold(0, |best, (i, s)| if *s > clean[best] { i } else { best });
        let remainder = total_idle - counts.iter().sum::<i64>();
        counts[argmax] += remainder;

        let desired = Self { counts };
        desired.check(total_idle, time)?;
        Ok(desired)
    }

    /// Wraps explicit counts, checking them against `total_idle`.
    pub fn from_counts(counts: Vec<i64>, total_idle: i64, time: usize) -> Result<Self> {
        let desired = Self { counts };
        desired.check(total_idle, time)?;
        Ok(desired)
    }

    fn check(&self, total_idle: i64, time: usize) -> Result<()> {
        if let Some((node, &value)) = self.counts.iter().enumerate().find(|(_, &c)| c < 0) {
            return Err(EamodError::NegativeAccumulation { node, time, value });
        }
        let found = self.total();
        if found != total_idle {
            return Err(EamodError::ConservationViolation {
                time,
                expected: total_idle,
                found,
            });
        }
        Ok(())
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn into_counts(self) -> Vec<i64> {
        self.counts
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Sums node counts per spatial region (`L` charge levels per region).
    pub fn per_region(&self, charge_levels: usize) -> Vec<i64> {
        self.counts
            .chunks(charge_levels.max(1))
            .map(|chunk| chunk.iter().sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remainder_goes_to_the_largest_share() {
        let d = DesiredAccumulation::from_shares(&[0.2, 0.5, 0.3], 7, 0).unwrap();
        // floor: 1, 3, 2 → remainder 1 to node 1
        assert_eq!(d.counts(), &[1, 4, 2]);
    }

    #[test]
    fn degenerate_shares_become_uniform() {
        let d = DesiredAccumulation::from_shares(&[f64::NAN, 0.0, -1.0], 4, 0).unwrap();
        assert_eq!(d.counts(), &[2, 1, 1]);
    }

    #[test]
    fn zero_idle_gives_zero_targets() {
        let d = DesiredAccumulation::from_shares(&[0.1, 0.9], 0, 3).unwrap();
        assert_eq!(d.counts(), &[0, 0]);
    }

    #[test]
    fn explicit_counts_are_checked() {
        let err = DesiredAccumulation::from_counts(vec![1, 2], 4, 5).unwrap_err();
        assert!(matches!(err, EamodError::ConservationViolation { time: 5, expected: 4, found: 3 }));
        let err = DesiredAccumulation::from_counts(vec![-1, 5], 4, 0).unwrap_err();
        assert!(matches!(err, EamodError::NegativeAccumulation { node: 0, .. }));
    }

    #[test]
    fn regional_totals() {
        let d = DesiredAccumulation::from_counts(vec![1, 2, 3, 4], 10, 0).unwrap();
        assert_eq!(d.per_region(2), vec![3, 7]);
    }

    proptest! {
        #[test]
        fn conserves_the_idle_fleet(
            shares in prop::collection::vec(0.0f64..10.0, 1..40),
            total in 0i64..5_000,
        ) {
            let d = DesiredAccumulation::from_shares(&shares, total, 0).unwrap();
            prop_assert_eq!(d.total(), total);
            prop_assert!(d.counts().iter().all(|&c| c >= 0));
            prop_assert_eq!(d.counts().len(), shares.len());
        }

        #[test]
        fn mean_action_is_deterministic(
            shares in prop::collection::vec(0.01f64..1.0, 2..20),
            total in 1i64..500,
        ) {
            let a = DesiredAccumulation::from_shares(&shares, total, 0).unwrap();
            let b = DesiredAccumulation::from_shares(&shares, total, 0).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
