//! Adam with inspectable state.
//!
//! `tch`'s built-in optimizers keep their moments inside libtorch, out of
//! reach of a checkpoint. This one keeps them in named tensors so they can be
//! written next to the parameters and restored exactly.

use std::collections::{BTreeMap, HashMap};

use tch::{nn, Kind, Tensor};

use crate::error::{EamodError, Result};

/// Adam optimizer over the trainable variables of one [`nn::VarStore`].
#[derive(Debug)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    step: i64,
    /// First and second moments, keyed by variable name.
    moments: BTreeMap<String, (Tensor, Tensor)>,
}

impl Adam {
    /// Creates an optimizer with the usual `(0.9, 0.999, 1e-8)` constants.
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            moments: BTreeMap::new(),
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// Number of steps taken.
    pub fn steps(&self) -> i64 {
        self.step
    }

    /// Resets every gradient of `vs` to zero.
    pub fn zero_grad(&self, vs: &nn::VarStore) {
        for mut var in vs.trainable_variables() {
            var.zero_grad();
        }
    }

    /// Rescales gradients so their global L2 norm is at most `max_norm`.
    ///
    /// # Returns
    ///
    /// The norm before clipping.
    pub fn clip_grad_norm(&self, vs: &nn::VarStore, max_norm: f64) -> f64 {
        let grads: Vec<Tensor> = vs
            .trainable_variables()
            .iter()
            .map(|v| v.grad())
            .filter(|g| g.defined())
            .collect();
        let total = grads
            .iter()
            .map(|g| g.norm().double_value(&[]).powi(2))
            .sum::<f64>()
            .sqrt();
        if total > max_norm {
            let scale = max_norm / (total + 1e-6);
            tch::no_grad(|| {
                for mut g in grads {
                    let _ = g.mul_scalar_(scale);
                }
            });
        }
        total
    }

    /// Applies one Adam update to every variable of `vs` that has a gradient.
    pub fn step(&mut self, vs: &nn::VarStore) {
        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step as i32);
        tch::no_grad(|| {
            for (name, mut var) in vs.variables() {
                if !var.requires_grad() {
                    continue;
                }
                let grad = var.grad();
                if !grad.defined() {
                    continue;
                }
                let (m, v) = self
                    .moments
                    .remove(&name)
                    .unwrap_or_else(|| (grad.zeros_like(), grad.zeros_like()));
                let m = m * self.beta1 + &grad * (1.0 - self.beta1);
                let v = v * self.beta2 + grad.square() * (1.0 - self.beta2);
                let update = (&m / bias1) / ((&v / bias2).sqrt() + self.eps) * self.lr;
                let _ = var.sub_(&update);
                self.moments.insert(name, (m, v));
            }
        });
    }

    /// Optimizer state as named tensors under `prefix`.
    pub fn named_state(&self, prefix: &str) -> Vec<(String, Tensor)> {
        let mut state = vec![
            (format!("{}.lr", prefix), Tensor::from_slice(&[self.lr])),
            (format!("{}.step", prefix), Tensor::from_slice(&[self.step])),
        ];
        for (name, (m, v)) in &self.moments {
            state.push((format!("{}.m.{}", prefix, name), m.detach().copy()));
            state.push((format!("{}.v.{}", prefix, name), v.detach().copy()));
        }
        state
    }

    /// Restores the state written by [`Adam::named_state`] under `prefix`.
    pub fn load_named_state(&mut self, prefix: &str, tensors: &HashMap<String, Tensor>) -> Result<()> {
        let scalar = |key: &str| {
            tensors
                .get(&format!("{}.{}", prefix, key))
                .ok_or_else(|| EamodError::Checkpoint(format!("missing {}.{}", prefix, key)))
        };
        self.lr = scalar("lr")?.to_kind(Kind::Double).double_value(&[0]);
        self.step = scalar("step")?.to_kind(Kind::Int64).int64_value(&[0]);

        let m_prefix = format!("{}.m.", prefix);
        let mut moments = BTreeMap::new();
        for (key, m) in tensors {
            let Some(name) = key.strip_prefix(&m_prefix) else {
                continue;
            };
            let v = tensors
                .get(&format!("{}.v.{}", prefix, name))
                .ok_or_else(|| EamodError::Checkpoint(format!("missing second moment of {}", name)))?;
            moments.insert(name.to_string(), (m.copy(), v.copy()));
        }
        self.moments = moments;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::Module;
    use tch::Device;

    fn quadratic_step(opt: &mut Adam, vs: &nn::VarStore, x: &Tensor) -> f64 {
        let loss = x.square().sum(Kind::Float);
        opt.zero_grad(vs);
        loss.backward();
        opt.step(vs);
        loss.double_value(&[])
    }

    #[test]
    fn minimizes_a_quadratic() {
        let vs = nn::VarStore::new(Device::Cpu);
        let x = vs.root().var("x", &[3], nn::Init::Const(2.0));
        let mut opt = Adam::new(0.1);
        let first = quadratic_step(&mut opt, &vs, &x);
        let mut last = first;
        for _ in 0..50 {
            last = quadratic_step(&mut opt, &vs, &x);
        }
        assert!(last < first);
        assert_eq!(opt.steps(), 51);
    }

    #[test]
    fn clipping_bounds_the_gradient_norm() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = nn::linear(&vs.root() / "l", 4, 1, Default::default());
        let input = Tensor::ones([1, 4], (Kind::Float, Device::Cpu)) * 100.0;
        let opt = Adam::new(1e-3);
        opt.zero_grad(&vs);
        layer.forward(&input).sum(Kind::Float).backward();
        let before = opt.clip_grad_norm(&vs, 0.5);
        assert!(before > 0.5);
        assert!(opt.clip_grad_norm(&vs, 0.5) <= 0.5 + 1e-4);
    }

    #[test]
    fn named_state_restores() {
        let vs = nn::VarStore::new(Device::Cpu);
        let x = vs.root().var("x", &[2], nn::Init::Const(1.0));
        let mut opt = Adam::new(0.05);
        quadratic_step(&mut opt, &vs, &x);
        quadratic_step(&mut opt, &vs, &x);

        let state: HashMap<String, Tensor> = opt.named_state("opt").into_iter().collect();
        let mut restored = Adam::new(1.0);
        restored.load_named_state("opt", &state).unwrap();
        assert_eq!(restored.steps(), 2);
        assert!((restored.lr() - 0.05).abs() < 1e-12);
        let (m, v) = &opt.moments["x"];
        let (rm, rv) = &restored.moments["x"];
        assert!(m.equal(rm));
        assert!(v.equal(rv));
    }
}
