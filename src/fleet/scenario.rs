//! Scenario document: the immutable description of one e-AMoD instance.
//!
//! The JSON layout follows the trip-attribute format used by the scenario
//! generators (`spatialNodes`, `chargelevels`, `demand`, `rebTime`, ...).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EamodError, Result};

/// One entry of the trip table: expected demand and fare for an origin/destination
/// region pair at a given timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripAttr {
    pub time_stamp: usize,
    pub origin: usize,
    pub destination: usize,
    pub demand: f64,
    pub price: f64,
}

/// Travel time (in timesteps) between two regions departing at `time_stamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebTimeAttr {
    pub time_stamp: usize,
    pub origin: usize,
    pub destination: usize,
    pub reb_time: u32,
}

/// Explicit initial placement of vehicles on a `(region, charge)` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialAccumulation {
    pub region: usize,
    pub charge: usize,
    pub vehicles: u32,
}

fn default_demand_ratio() -> f64 {
    1.0
}

fn default_charge_step() -> usize {
    1
}

fn default_time_granularity() -> f64 {
    1.0
}

/// Loaded scenario. Treated as read-only configuration by the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Number of spatial regions.
    pub spatial_nodes: usize,
    /// Number of discrete charge levels `L` (levels are `0..L`).
    #[serde(rename = "chargelevels")]
    pub number_charge_levels: usize,
    /// Charge levels gained by one timestep on a charger.
    #[serde(default = "default_charge_step")]
    pub charge_levels_per_charge_step: usize,
    /// `true` for every region hosting a charging station.
    #[serde(rename = "chargeLocations")]
    pub charging_stations: Vec<bool>,
    /// Vehicles that may charge simultaneously at each region.
    pub cars_per_station_capacity: Vec<u32>,
    /// Fleet size.
    pub total_acc: u32,
    /// Explicit initial placement. Spread evenly over all nodes when absent.
    #[serde(default)]
    pub initial_acc: Option<Vec<InitialAccumulation>>,
    /// Episode horizon in timesteps.
    pub episode_length: usize,
    /// Length of one timestep in hours.
    #[serde(default = "default_time_granularity")]
    pub time_granularity: f64,
    /// Cost of keeping one vehicle on the road for one timestep.
    pub operational_cost_per_timestep: f64,
    /// Electricity price per charge level, one entry per timestep.
    #[serde(rename = "energy_prices")]
    pub energy_prices: Vec<f64>,
    /// Charge levels consumed driving from region `o` to region `d`.
    pub energy_distance: Vec<Vec<u32>>,
    /// Trip table.
    #[serde(rename = "demand")]
    pub trips: Vec<TripAttr>,
    /// Road travel times. Missing entries default to one timestep.
    #[serde(default)]
    pub reb_time: Vec<RebTimeAttr>,
    /// Multiplier applied to every expected demand value.
    #[serde(default = "default_demand_ratio")]
    pub demand_ratio: f64,
}

impl Scenario {
    /// Parses and validates a scenario from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reads, parses and validates a scenario file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Number of `(region, charge)` nodes.
    pub fn number_nodes(&self) -> usize {
        self.spatial_nodes * self.number_charge_levels
    }

    /// Electricity price at timestep `t`; the last price repeats past the table.
    pub fn energy_price(&self, t: usize) -> f64 {
        self.energy_prices
            .get(t)
            .or_else(|| self.energy_prices.last())
            .copied()
            .unwrap_or(0.0)
    }

    /// Lowest charge a vehicle may be left with after reaching region `destination`.
    ///
    /// Vehicles may arrive empty at a charging region, everywhere else one level
    /// must remain.
    pub fn min_arrival_charge(&self, destination: usize) -> usize {
        usize::from(!self.charging_stations[destination])
    }

    /// Charge level after driving `origin → destination` from `charge`, or `None`
    /// when the trip would leave the vehicle below the allowed minimum.
    pub fn arrival_charge(&self, charge: usize, origin: usize, destination: usize) -> Option<usize> {
        let needed = self.energy_distance[origin][destination] as usize;
        let remaining = charge.checked_sub(needed)?;
        (remaining >= self.min_arrival_charge(destination)).then_some(remaining)
    }

    /// Initial vehicle count per dense node id (`region * L + charge`).
    pub fn initial_accumulation(&self) -> Vec<i64> {
        let n = self.number_nodes();
        let mut acc = vec![0i64; n];
        match &self.initial_acc {
            Some(placements) => {
                for p in placements {
                    acc[p.region * self.number_charge_levels + p.charge] += i64::from(p.vehicles);
                }
            }
            None => {
                let base = i64::from(self.total_acc) / n as i64;
                let rest = i64::from(self.total_acc) % n as i64;
                for (i, a) in acc.iter_mut().enumerate() {
                    *a = base + i64::from((i as i64) < rest);
                }
            }
        }
        acc
    }

    /// Checks internal consistency. Called by every constructor.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EamodError::InvalidScenario(msg));
        if self.spatial_nodes == 0 || self.number_charge_levels == 0 {
            return invalid("scenario needs at least one region and one charge level".into());
        }
        if self.episode_length == 0 {
            return invalid("episode length must be positive".into());
        }
        if self.charging_stations.len() != self.spatial_nodes {
            return invalid(format!(
                "chargeLocations has {} entries for {} regions",
                self.charging_stations.len(),
                self.spatial_nodes
            ));
        }
        if self.cars_per_station_capacity.len() != self.spatial_nodes {
            return invalid(format!(
                "carsPerStationCapacity has {} entries for {} regions",
                self.cars_per_station_capacity.len(),
                self.spatial_nodes
            ));
        }
        if self.energy_distance.len() != self.spatial_nodes
            || self
                .energy_distance
                .iter()
                .any(|row| row.len() != self.spatial_nodes)
        {
            return invalid("energyDistance must be a square matrix over regions".into());
        }
        if !(self.demand_ratio.is_finite() && self.demand_ratio >= 0.0) {
            return invalid(format!("demand ratio {} is not usable", self.demand_ratio));
        }
        if !(self.time_granularity.is_finite() && self.time_granularity > 0.0) {
            return invalid(format!("time granularity {} is not usable", self.time_granularity));
        }
        if !self.operational_cost_per_timestep.is_finite() {
            return invalid("operational cost must be finite".into());
        }
        if self.energy_prices.iter().any(|p| !p.is_finite()) {
            return invalid("energy prices must be finite".into());
        }
        for trip in &self.trips {
            if trip.origin >= self.spatial_nodes || trip.destination >= self.spatial_nodes {
                return invalid(format!(
                    "trip {}→{} references an unknown region",
                    trip.origin, trip.destination
                ));
            }
            if !(trip.demand.is_finite() && trip.demand >= 0.0) || !trip.price.is_finite() {
                return invalid(format!(
                    "trip {}→{} at t={} has invalid demand/price",
                    trip.origin, trip.destination, trip.time_stamp
                ));
            }
        }
        for rt in &self.reb_time {
            if rt.origin >= self.spatial_nodes || rt.destination >= self.spatial_nodes {
                return invalid(format!(
                    "travel time {}→{} references an unknown region",
                    rt.origin, rt.destination
                ));
            }
            if rt.origin != rt.destination && rt.reb_time == 0 {
                return invalid(format!(
                    "travel time {}→{} at t={} must be at least one timestep",
                    rt.origin, rt.destination, rt.time_stamp
                ));
            }
        }
        if let Some(placements) = &self.initial_acc {
            let mut total = 0u64;
            for p in placements {
                if p.region >= self.spatial_nodes || p.charge >= self.number_charge_levels {
                    return invalid(format!(
                        "initial placement ({}, {}) is outside the node set",
                        p.region, p.charge
                    ));
                }
                total += u64::from(p.vehicles);
            }
            if total != u64::from(self.total_acc) {
                return invalid(format!(
                    "initial placement holds {} vehicles but totalAcc is {}",
                    total, self.total_acc
                ));
            }
        }
        Ok(())
    }
}

/// Programmatic construction of a [`Scenario`].
///
/// ```ignore
/// let scenario = ScenarioBuilder::new(2, 3, 4)
///     .fleet(10)
///     .charging_station(0, 5)
///     .trip(0, 0, 1, 3.0, 12.0)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    /// Starts a scenario with `spatial_nodes` regions, `charge_levels` levels and
    /// an episode of `episode_length` steps. Energy distances default to one
    /// level between distinct regions.
    pub fn new(spatial_nodes: usize, charge_levels: usize, episode_length: usize) -> Self {
        let energy_distance = (0..spatial_nodes)
            .map(|o| (0..spatial_nodes).map(|d| u32::from(o != d)).collect())
            .collect();
        Self {
            scenario: Scenario {
                spatial_nodes,
                number_charge_levels: charge_levels,
                charge_levels_per_charge_step: 1,
                charging_stations: vec![false; spatial_nodes],
                cars_per_station_capacity: vec![0; spatial_nodes],
                total_acc: 0,
                initial_acc: None,
                episode_length,
                time_granularity: 1.0,
                operational_cost_per_timestep: 1.0,
                energy_prices: vec![1.0],
                energy_distance,
                trips: Vec::new(),
                reb_time: Vec::new(),
                demand_ratio: 1.0,
            },
        }
    }

    pub fn fleet(mut self, vehicles: u32) -> Self {
        self.scenario.total_acc = vehicles;
        self
    }

    /// Places `vehicles` on node `(region, charge)` and grows the fleet accordingly.
    pub fn place(mut self, region: usize, charge: usize, vehicles: u32) -> Self {
        self.scenario
            .initial_acc
            .get_or_insert_with(Vec::new)
            .push(InitialAccumulation {
                region,
                charge,
                vehicles,
            });
        self.scenario.total_acc = self
            .scenario
            .initial_acc
            .iter()
            .flatten()
            .map(|p| p.vehicles)
            .sum();
        self
    }

    pub fn charging_station(mut self, region: usize, capacity: u32) -> Self {
        self.scenario.charging_stations[region] = true;
        self.scenario.cars_per_station_capacity[region] = capacity;
        self
    }

    pub fn charge_step(mut self, levels: usize) -> Self {
        self.scenario.charge_levels_per_charge_step = levels;
        self
    }

    pub fn energy_distance(mut self, matrix: Vec<Vec<u32>>) -> Self {
        self.scenario.energy_distance = matrix;
        self
    }

    pub fn energy_prices(mut self, prices: Vec<f64>) -> Self {
        self.scenario.energy_prices = prices;
        self
    }

    pub fn operational_cost(mut self, cost: f64) -> Self {
        self.scenario.operational_cost_per_timestep = cost;
        self
    }

    pub fn time_granularity(mut self, hours: f64) -> Self {
        self.scenario.time_granularity = hours;
        self
    }

    pub fn demand_ratio(mut self, ratio: f64) -> Self {
        self.scenario.demand_ratio = ratio;
        self
    }

    pub fn trip(mut self, t: usize, origin: usize, destination: usize, demand: f64, price: f64) -> Self {
        self.scenario.trips.push(TripAttr {
            time_stamp: t,
            origin,
            destination,
            demand,
            price,
        });
        self
    }

    pub fn travel_time(mut self, t: usize, origin: usize, destination: usize, steps: u32) -> Self {
        self.scenario.reb_time.push(RebTimeAttr {
            time_stamp: t,
            origin,
            destination,
            reb_time: steps,
        });
        self
    }

    /// Validates and returns the scenario.
    pub fn build(self) -> Result<Scenario> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOY: &str = r#"{
        "spatialNodes": 2,
        "chargelevels": 3,
        "chargeLevelsPerChargeStep": 1,
        "chargeLocations": [true, false],
        "carsPerStationCapacity": [4, 0],
        "totalAcc": 6,
        "episodeLength": 3,
        "timeGranularity": 0.5,
        "operationalCostPerTimestep": 0.5,
        "energy_prices": [1.0, 2.0],
        "energyDistance": [[0, 1], [1, 0]],
        "demand": [
            {"time_stamp": 0, "origin": 0, "destination": 1, "demand": 2.0, "price": 10.0}
        ],
        "rebTime": [
            {"time_stamp": 0, "origin": 0, "destination": 1, "reb_time": 2}
        ]
    }"#;

    #[test]
    fn parses_json_layout() {
        let s = Scenario::from_json_str(TOY).unwrap();
        assert_eq!(s.spatial_nodes, 2);
        assert_eq!(s.number_charge_levels, 3);
        assert_eq!(s.number_nodes(), 6);
        assert_eq!(s.trips.len(), 1);
        assert_eq!(s.reb_time[0].reb_time, 2);
        assert_eq!(s.demand_ratio, 1.0);
        assert_eq!(s.time_granularity, 0.5);
    }

    #[test]
    fn time_granularity_defaults_and_is_checked() {
        let hourly = TOY.replace("\"timeGranularity\": 0.5,", "");
        assert_eq!(Scenario::from_json_str(&hourly).unwrap().time_granularity, 1.0);

        let bad = TOY.replace("\"timeGranularity\": 0.5", "\"timeGranularity\": 0.0");
        assert!(matches!(
            Scenario::from_json_str(&bad),
            Err(EamodError::InvalidScenario(_))
        ));
        assert!(ScenarioBuilder::new(1, 2, 2).fleet(2).time_granularity(-1.0).build().is_err());
    }

    #[test]
    fn even_initial_spread() {
        let s = Scenario::from_json_str(TOY).unwrap();
        let acc = s.initial_accumulation();
        assert_eq!(acc, vec![1; 6]);
        assert_eq!(acc.iter().sum::<i64>(), 6);
    }

    #[test]
    fn uneven_spread_keeps_total() {
        let s = ScenarioBuilder::new(2, 2, 2).fleet(7).build().unwrap();
        let acc = s.initial_accumulation();
        assert_eq!(acc.iter().sum::<i64>(), 7);
        assert_eq!(acc, vec![2, 2, 2, 1]);
    }

    #[test]
    fn energy_price_repeats_last() {
        let s = Scenario::from_json_str(TOY).unwrap();
        assert_eq!(s.energy_price(0), 1.0);
        assert_eq!(s.energy_price(5), 2.0);
    }

    #[test]
    fn arrival_charge_rules() {
        let s = Scenario::from_json_str(TOY).unwrap();
        // Region 1 has no charger: one level must remain.
        assert_eq!(s.arrival_charge(2, 0, 1), Some(1));
        assert_eq!(s.arrival_charge(1, 0, 1), None);
        // Region 0 hosts a charger: arriving empty is allowed.
        assert_eq!(s.arrival_charge(1, 1, 0), Some(0));
        assert_eq!(s.arrival_charge(0, 1, 0), None);
    }

    #[test]
    fn rejects_bad_capacity_table() {
        let bad = TOY.replace("\"carsPerStationCapacity\": [4, 0]", "\"carsPerStationCapacity\": [4]");
        let err = Scenario::from_json_str(&bad).unwrap_err();
        assert!(matches!(err, EamodError::InvalidScenario(_)));
    }

    #[test]
    fn rejects_placement_mismatch() {
        let result = ScenarioBuilder::new(1, 2, 2)
            .place(0, 1, 3)
            .fleet(5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_place_sets_fleet() {
        let s = ScenarioBuilder::new(1, 2, 2).place(0, 0, 3).place(0, 1, 2).build().unwrap();
        assert_eq!(s.total_acc, 5);
        assert_eq!(s.initial_accumulation(), vec![3, 2]);
    }

    #[test]
    fn bundled_toy_scenario_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/toy_scenario.json");
        let s = Scenario::from_path(path).unwrap();
        assert_eq!(s.number_nodes(), 12);
        assert_eq!(s.initial_accumulation().iter().sum::<i64>(), 24);
    }
}
