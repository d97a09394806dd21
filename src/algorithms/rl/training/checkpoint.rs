//! Checkpoint archive: named tensors in one file.
//!
//! Variables are stored as `<prefix>.<variable name>`, so several variable
//! stores and optimizer states can share one archive.

use std::collections::HashMap;
use std::path::Path;

use tch::{nn, Tensor};

use crate::error::{EamodError, Result};

/// Named tensors collected for writing, or read back from disk.
#[derive(Debug, Default)]
pub struct CheckpointArchive {
    tensors: HashMap<String, Tensor>,
}

impl CheckpointArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a copy of every variable of `vs` under `prefix`.
    pub fn push_var_store(&mut self, prefix: &str, vs: &nn::VarStore) {
        for (name, var) in vs.variables() {
            self.tensors
                .insert(format!("{}.{}", prefix, name), var.detach().copy());
        }
    }

    pub fn push(&mut self, name: String, tensor: Tensor) {
        self.tensors.insert(name, tensor);
    }

    pub fn extend(&mut self, named: impl IntoIterator<Item = (String, Tensor)>) {
        self.tensors.extend(named);
    }

    pub fn tensors(&self) -> &HashMap<String, Tensor> {
        &self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let named: Vec<(&str, &Tensor)> = self.tensors.iter().map(|(k, v)| (k.as_str(), v)).collect();
        Tensor::save_multi(&named, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let tensors = Tensor::load_multi(path)?.into_iter().collect();
        Ok(Self { tensors })
    }

    /// Copies the archived values under `prefix` into the variables of `vs`.
    /// Every variable must be present with a matching shape.
    pub fn restore_var_store(&self, prefix: &str, vs: &mut nn::VarStore) -> Result<()> {
        for (name, var) in vs.variables() {
            let key = format!("{}.{}", prefix, name);
            let source = self
                .tensors
                .get(&key)
                .ok_or_else(|| EamodError::Checkpoint(format!("missing {}", key)))?;
            if source.size() != var.size() {
                return Err(EamodError::Checkpoint(format!(
                    "shape of {} is {:?}, expected {:?}",
                    key,
                    source.size(),
                    var.size()
                )));
            }
            let mut var = var;
            tch::no_grad(|| var.copy_(source));
        }
        Ok(())
    }
}
