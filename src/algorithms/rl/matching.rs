//! Passenger flow derived from a learned per-node output, bypassing the LP.

use crate::error::{EamodError, Result};
use crate::fleet::StateModel;
use crate::flows::PassengerFlow;

/// Vehicles per trip edge: `⌊fleet · (a[destination] − a[origin])⌋`, never negative.
///
/// Infeasible counts are left for [`StateModel::apply_passenger_step`] to clamp.
pub fn derive_passenger_flow(state: &StateModel, node_output: &[f64]) -> Result<PassengerFlow> {
    let nodes = state.graph().number_nodes();
    if node_output.len() != nodes {
        return Err(EamodError::DimensionMismatch {
            what: "matching policy output",
            expected: nodes,
            found: node_output.len(),
        });
    }
    let fleet = state.fleet_size() as f64;
    let vehicles = state
        .graph()
        .trips()
        .iter()
        .map(|trip| {
            let gap = node_output[trip.destination] - node_output[trip.origin];
            let v = (fleet * gap).floor();
            if v.is_finite() && v > 0.0 {
                v as i64
            } else {
                0
            }
        })
        .collect();
    Ok(PassengerFlow::new(vehicles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::ScenarioBuilder;

    fn state() -> StateModel {
        let scenario = ScenarioBuilder::new(2, 2, 2)
            .place(0, 1, 10)
            .charging_station(1, 1)
            .trip(0, 0, 1, 5.0, 3.0)
            .build()
            .unwrap();
        StateModel::new(scenario, 0).unwrap()
    }

    #[test]
    fn flow_follows_the_output_gap() {
        let state = state();
        let mut output = vec![0.0; 4];
        // Trip (0,1) → (1,0) since region 1 has a charger.
        output[state.graph().node_id(1, 0)] = 0.35;
        output[state.graph().node_id(0, 1)] = 0.1;
        let flow = derive_passenger_flow(&state, &output).unwrap();
        let k = state
            .graph()
            .trips()
            .iter()
            .position(|t| t.origin == state.graph().node_id(0, 1))
            .unwrap();
        assert_eq!(flow.vehicles[k], 2);
    }

    #[test]
    fn reversed_gap_moves_nothing() {
        let state = state();
        let output = vec![0.9, 0.9, 0.0, 0.0];
        let flow = derive_passenger_flow(&state, &output).unwrap();
        assert_eq!(flow.total(), 0);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let state = state();
        assert!(derive_passenger_flow(&state, &[0.5]).is_err());
    }
}
