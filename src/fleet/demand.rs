//! Per-episode demand and price realization.

use log::warn;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};

use super::scenario::Scenario;

/// Dense `[t][origin][destination]` demand and price tables.
///
/// The expected demand comes from the scenario's trip table scaled by the
/// demand ratio; [`DemandModel::realize`] turns it into the trip counts used for
/// one episode. Lookups outside the table return zero.
#[derive(Debug, Clone)]
pub struct DemandModel {
    spatial: usize,
    horizon: usize,
    expected: Vec<f64>,
    prices: Vec<f64>,
    realized: Vec<f64>,
}

impl DemandModel {
    pub fn new(scenario: &Scenario) -> Self {
        let spatial = scenario.spatial_nodes;
        let horizon = scenario.episode_length;
        let mut expected = vec![0.0; horizon * spatial * spatial];
        let mut prices = vec![0.0; horizon * spatial * spatial];
        for trip in scenario.trips.iter().filter(|trip| trip.time_stamp < horizon) {
            let i = (trip.time_stamp * spatial + trip.origin) * spatial + trip.destination;
            expected[i] += trip.demand * scenario.demand_ratio;
            prices[i] = trip.price;
        }
        let realized = expected.iter().map(|d| d.round()).collect();
        Self {
            spatial,
            horizon,
            expected,
            prices,
            realized,
        }
    }

    fn index(&self, origin: usize, destination: usize, t: usize) -> Option<usize> {
        (t < self.horizon).then(|| (t * self.spatial + origin) * self.spatial + destination)
    }

    /// Draws the trip counts for a new episode.
    ///
    /// With `random` set every entry is a Poisson draw around its expectation;
    /// otherwise the expectation is rounded to whole trips.
    pub fn realize(&mut self, random: bool, rng: &mut StdRng) {
        for (realized, &mean) in self.realized.iter_mut().zip(&self.expected) {
            *realized = match Poisson::new(mean) {
                _ if !random || mean == 0.0 => mean.round(),
                Ok(poisson) if mean.is_finite() => poisson.sample(rng),
                Ok(_) | Err(_) => {
                    warn!("cannot draw Poisson demand with mean {}; using the rounded expectation", mean);
                    if mean.is_finite() {
                        mean.max(0.0).round()
                    } else {
                        0.0
                    }
                }
            };
        }
    }

    /// Realized trip count for `origin → destination` at `t`.
    pub fn demand(&self, origin: usize, destination: usize, t: usize) -> f64 {
        self.index(origin, destination, t)
            .map_or(0.0, |i| self.realized[i])
    }

    /// Fare for `origin → destination` at `t`.
    pub fn price(&self, origin: usize, destination: usize, t: usize) -> f64 {
        self.index(origin, destination, t).map_or(0.0, |i| self.prices[i])
    }

    /// Total realized demand leaving each region over the whole episode.
    pub fn total_by_origin(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.spatial];
        for t in 0..self.horizon {
            for (o, total) in totals.iter_mut().enumerate() {
                for d in 0..self.spatial {
                    *total += self.demand(o, d, t);
                }
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::scenario::ScenarioBuilder;
    use rand::SeedableRng;

    fn scenario() -> Scenario {
        ScenarioBuilder::new(2, 2, 3)
            .fleet(4)
            .trip(0, 0, 1, 2.4, 10.0)
            .trip(0, 0, 1, 1.0, 12.0)
            .trip(2, 1, 0, 30.0, 8.0)
            .trip(7, 1, 0, 5.0, 8.0)
            .build()
            .unwrap()
    }

    #[test]
    fn deterministic_realization_rounds_expectation() {
        let mut model = DemandModel::new(&scenario());
        let mut rng = StdRng::seed_from_u64(1);
        model.realize(false, &mut rng);
        assert_eq!(model.demand(0, 1, 0), 3.0);
        assert_eq!(model.price(0, 1, 0), 12.0);
        assert_eq!(model.demand(1, 0, 2), 30.0);
        assert_eq!(model.demand(1, 0, 1), 0.0);
    }

    #[test]
    fn out_of_horizon_is_zero() {
        let model = DemandModel::new(&scenario());
        assert_eq!(model.demand(1, 0, 7), 0.0);
        assert_eq!(model.price(1, 0, 50), 0.0);
    }

    #[test]
    fn random_realization_is_integral_and_seeded() {
        let mut a = DemandModel::new(&scenario());
        let mut b = DemandModel::new(&scenario());
        a.realize(true, &mut StdRng::seed_from_u64(9));
        b.realize(true, &mut StdRng::seed_from_u64(9));
        let d = a.demand(1, 0, 2);
        assert_eq!(d, d.round());
        assert!(d >= 0.0);
        assert_eq!(d, b.demand(1, 0, 2));
        assert_eq!(a.demand(0, 0, 0), 0.0);
    }

    #[test]
    fn invalid_means_fall_back_without_sampling() {
        let mut model = DemandModel::new(&scenario());
        model.expected[0] = f64::NAN;
        model.expected[1] = f64::INFINITY;
        model.expected[2] = -3.0;
        model.realize(true, &mut StdRng::seed_from_u64(4));
        assert_eq!(model.realized[0], 0.0);
        assert_eq!(model.realized[1], 0.0);
        assert_eq!(model.realized[2], 0.0);
        let d = model.demand(1, 0, 2);
        assert_eq!(d, d.round());
    }

    #[test]
    fn totals_by_origin() {
        let mut model = DemandModel::new(&scenario());
        model.realize(false, &mut StdRng::seed_from_u64(0));
        assert_eq!(model.total_by_origin(), vec![3.0, 30.0]);
    }
}
