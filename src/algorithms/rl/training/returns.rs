//! Discounted returns for the episodic actor-critic update.

/// Stabilizer added to the standard deviation (single-precision epsilon).
pub const RETURN_EPS: f64 = f32::EPSILON as f64;

/// Computes `R_t = r_t + γ·R_{t+1}` backward from the episode end.
///
/// # Arguments
///
/// * `rewards` - Per-step rewards of one episode
/// * `gamma` - Discount factor
pub fn discounted_returns(rewards: &[f64], gamma: f64) -> Vec<f64> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running = 0.0;
    for t in (0..rewards.len()).rev() {
        running = rewards[t] + gamma * running;
        returns[t] = running;
    }
    returns
}

/// Standardizes in place to zero mean and unit (sample) standard deviation.
///
/// With fewer than two entries the deviation is taken as zero, so the result
/// is all zeros rather than NaN.
pub fn standardize(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    for v in values.iter_mut() {
        *v = (*v - mean) / (std + RETURN_EPS);
    }
}
