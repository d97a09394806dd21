//! Action distributions over the share of idle fleet per node.
//!
//! Both variants sample on the host with `rand_distr` from the detached
//! parameters and return a differentiable log-probability tensor. Logarithms
//! of probabilities and shares are taken after adding [`LOG_EPS`], so a zero
//! share or a saturated gate never yields a non-finite log-probability.

use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Distribution, Gamma};
use tch::{Kind, Tensor};

use crate::error::{EamodError, Result};

/// Added to every concentration after the softplus.
pub const CONCENTRATION_EPS: f64 = 1e-16;

/// Added before every logarithm.
pub const LOG_EPS: f64 = 1e-8;

/// Policy distribution for one observation.
pub enum ActionDistribution {
    /// One Dirichlet over all nodes.
    Dirichlet { concentration: Tensor },
    /// A Bernoulli gate per node; inactive nodes get a zero share and the
    /// Dirichlet covers the active nodes only.
    ZeroInflated { concentration: Tensor, gate: Tensor },
}

/// One action drawn from an [`ActionDistribution`].
pub struct SampledAction {
    /// Share of the idle fleet per node, summing to one.
    pub shares: Vec<f64>,
    /// Differentiable log-probability, a scalar tensor.
    pub log_prob: Tensor,
    /// Nodes that took part in the Dirichlet draw.
    pub active: Vec<bool>,
}

impl ActionDistribution {
    pub fn concentration(&self) -> &Tensor {
        match self {
            ActionDistribution::Dirichlet { concentration } => concentration,
            ActionDistribution::ZeroInflated { concentration, .. } => concentration,
        }
    }

    /// Draws a stochastic action.
    pub fn sample(&self, rng: &mut StdRng) -> Result<SampledAction> {
        let alpha = to_vec(self.concentration())?;
        match self {
            ActionDistribution::Dirichlet { concentration } => {
                let shares = sample_dirichlet(&alpha, rng)?;
                let log_prob = dirichlet_log_prob(concentration, &shares);
                Ok(SampledAction {
                    shares,
                    log_prob,
                    active: vec![true; alpha.len()],
                })
            }
            ActionDistribution::ZeroInflated { concentration, gate } => {
                let p = to_vec(gate)?;
                let mut active: Vec<bool> = p
                    .iter()
                    .map(|&p| {
                        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
                        Bernoulli::new(p).map(|b| b.sample(rng)).unwrap_or(false)
                    })
                    .collect();
                // At least one node must hold the fleet.
                if !active.iter().any(|&a| a) {
                    if let Some(best) = argmax(&p) {
                        active[best] = true;
                    }
                }

                let index: Vec<i64> = (0..active.len()).filter(|&i| active[i]).map(|i| i as i64).collect();
                let active_alpha: Vec<f64> = index.iter().map(|&i| alpha[i as usize]).collect();
                let active_shares = sample_dirichlet(&active_alpha, rng)?;
                let mut shares = vec![0.0; alpha.len()];
                for (&i, &s) in index.iter().zip(&active_shares) {
                    shares[i as usize] = s;
                }

                let device = concentration.device();
                let mask: Vec<f32> = active.iter().map(|&a| if a { 1.0 } else { 0.0 }).collect();
                let mask = Tensor::from_slice(&mask).to_device(device);
                let gate_log_prob = ((gate + LOG_EPS).log() * &mask
                    + (-gate + (1.0 + LOG_EPS)).log() * (-&mask + 1.0))
                    .sum(Kind::Float);
                let index = Tensor::from_slice(&index).to_device(device);
                let log_prob =
                    gate_log_prob + dirichlet_log_prob(&concentration.index_select(0, &index), &active_shares);
                Ok(SampledAction {
                    shares,
                    log_prob,
                    active,
                })
            }
        }
    }

    /// The normalized concentration vector, used as the deterministic action.
    pub fn mean(&self) -> Result<SampledAction> {
        let alpha = to_vec(self.concentration())?;
        let total: f64 = alpha.iter().sum();
        let shares: Vec<f64> = alpha.iter().map(|a| a / (total + CONCENTRATION_EPS)).collect();
        let log_prob = dirichlet_log_prob(self.concentration(), &shares);
        Ok(SampledAction {
            active: vec![true; shares.len()],
            shares,
            log_prob,
        })
    }

    /// Mean and (sample) standard deviation of the concentrations of the
    /// given nodes.
    pub fn concentration_stats(&self, active: &[bool]) -> Result<(f64, f64)> {
        let alpha = to_vec(self.concentration())?;
        let values: Vec<f64> = alpha
            .iter()
            .zip(active)
            .filter(|(_, &a)| a)
            .map(|(&v, _)| v)
            .collect();
        if values.is_empty() {
            return Ok((0.0, 0.0));
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Ok((mean, std))
    }
}

fn to_vec(t: &Tensor) -> Result<Vec<f64>> {
    Ok(Vec::<f64>::try_from(&t.detach().to_kind(Kind::Double))?)
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
        .or(if values.is_empty() { None } else { Some(0) })
}

/// Normalized Gamma draws. Degenerate concentrations fall back to the
/// smallest positive one; an all-zero draw puts everything on the largest
/// concentration.
fn sample_dirichlet(alpha: &[f64], rng: &mut StdRng) -> Result<Vec<f64>> {
    let mut draws = Vec::with_capacity(alpha.len());
    for &a in alpha {
        let shape = if a.is_finite() && a > 0.0 { a } else { CONCENTRATION_EPS };
        let gamma = Gamma::new(shape, 1.0).map_err(|e| EamodError::InvalidDistribution(e.to_string()))?;
        draws.push(gamma.sample(rng));
    }
    let total: f64 = draws.iter().sum();
    if total > 0.0 && total.is_finite() {
        Ok(draws.into_iter().map(|g| g / total).collect())
    } else {
        let mut shares = vec![0.0; alpha.len()];
        if let Some(best) = argmax(alpha) {
            shares[best] = 1.0;
        }
        Ok(shares)
    }
}

/// `ln Γ(Σα) − Σ ln Γ(α) + Σ (α − 1)·ln(x + ε)`.
fn dirichlet_log_prob(alpha: &Tensor, shares: &[f64]) -> Tensor {
    let x: Vec<f32> = shares.iter().map(|&s| s as f32).collect();
    let x = Tensor::from_slice(&x).to_device(alpha.device());
    alpha.sum(Kind::Float).lgamma() - alpha.lgamma().sum(Kind::Float)
        + ((alpha - 1.0) * (x + LOG_EPS).log()).sum(Kind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn alpha(values: &[f32]) -> Tensor {
        Tensor::from_slice(values)
    }

    #[test]
    fn dirichlet_samples_lie_on_the_simplex() {
        let dist = ActionDistribution::Dirichlet {
            concentration: alpha(&[0.5, 2.0, 5.0]),
        };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let action = dist.sample(&mut rng).unwrap();
            let total: f64 = action.shares.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert!(action.shares.iter().all(|&s| s >= 0.0));
            assert!(action.log_prob.double_value(&[]).is_finite());
        }
    }

    #[test]
    fn uniform_dirichlet_density_matches_closed_form() {
        // Dirichlet(1,1,1) has density Γ(3) = 2 everywhere on the simplex.
        let lp = dirichlet_log_prob(&alpha(&[1.0, 1.0, 1.0]), &[0.2, 0.3, 0.5]);
        assert!((lp.double_value(&[]) - 2f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn mean_is_normalized_concentration() {
        let dist = ActionDistribution::Dirichlet {
            concentration: alpha(&[1.0, 3.0]),
        };
        let action = dist.mean().unwrap();
        assert!((action.shares[0] - 0.25).abs() < 1e-6);
        assert!((action.shares[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn closed_gates_get_no_share() {
        let dist = ActionDistribution::ZeroInflated {
            concentration: alpha(&[1.0, 1.0, 1.0, 1.0]),
            gate: alpha(&[1.0, 0.0, 1.0, 0.0]),
        };
        let mut rng = StdRng::seed_from_u64(3);
        let action = dist.sample(&mut rng).unwrap();
        assert_eq!(action.active, vec![true, false, true, false]);
        assert_eq!(action.shares[1], 0.0);
        assert_eq!(action.shares[3], 0.0);
        assert!((action.shares[0] + action.shares[2] - 1.0).abs() < 1e-9);
        // Saturated gates stay finite thanks to the epsilon.
        assert!(action.log_prob.double_value(&[]).is_finite());
    }

    #[test]
    fn all_closed_gates_keep_the_most_likely_node() {
        let dist = ActionDistribution::ZeroInflated {
            concentration: alpha(&[1.0, 1.0, 1.0]),
            gate: alpha(&[0.0, 0.0, 0.0]),
        };
        let mut rng = StdRng::seed_from_u64(0);
        let action = dist.sample(&mut rng).unwrap();
        assert_eq!(action.shares, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn stats_cover_active_nodes_only() {
        let dist = ActionDistribution::Dirichlet {
            concentration: alpha(&[2.0, 4.0, 100.0]),
        };
        let (mean, std) = dist.concentration_stats(&[true, true, false]).unwrap();
        assert!((mean - 3.0).abs() < 1e-6);
        assert!((std - 2f64.sqrt()).abs() < 1e-6);
    }
}
