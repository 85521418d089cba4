//! Explicit trainable parameter collection.
//!
//! The optimizer, the gradient clipping and persistence all walk the same
//! name-sorted list of [`Var`]s, so the order of parameters is stable across
//! runs and processes.

use std::collections::HashMap;

use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::VarMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::{TrajError, TrajResult};

const OUTPUT_WEIGHT_STDDEV: f32 = 0.01;
const OUTPUT_BIAS_INIT: f32 = 0.01;
const FORGET_BIAS: f32 = 1.0;

/// Name-sorted trainable variables of one model.
#[derive(Clone)]
pub struct ParameterSet {
    entries: Vec<(String, Var)>,
}

impl ParameterSet {
    /// Snapshot the variables registered in `var_map`.
    pub fn from_var_map(var_map: &VarMap) -> TrajResult<Self> {
        let data = var_map
            .data()
            .lock()
            .map_err(|e| TrajError::lock_poisoned(e.to_string()))?;
        let mut entries: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Var)> {
        self.entries.iter().map(|(name, var)| (name.as_str(), var))
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, var)| var)
    }

    /// Total number of scalars.
    pub fn element_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.elem_count()).sum()
    }

    /// Pull the gradient of every parameter out of a backward pass.
    ///
    /// Parameters the loss does not depend on are left out.
    pub fn gradients(&self, grads: &GradStore) -> TrajResult<HashMap<String, Tensor>> {
        let map: HashMap<String, Tensor> = self
            .entries
            .iter()
            .filter_map(|(name, var)| grads.get(var).map(|g| (name.clone(), g.clone())))
            .collect();
        if map.is_empty() {
            return Err(TrajError::NoGradients);
        }
        Ok(map)
    }

    /// Flattened copy of every parameter, keyed by name.
    pub fn snapshot(&self) -> TrajResult<HashMap<String, Vec<f32>>> {
        self.entries
            .iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().flatten_all()?.to_vec1::<f32>()?)))
            .collect()
    }

    /// Overwrite every variable with deterministic values drawn from `seed`.
    ///
    /// - LSTM weights: uniform in `±1/sqrt(hidden)`.
    /// - LSTM input bias: forget-gate slice 1.0, rest 0.
    /// - LSTM recurrent bias: 0.
    /// - Projection weight: normal with stddev 0.01, redrawn beyond two stddevs.
    /// - Projection bias: 0.01.
    pub fn initialize(&self, seed: u64, hidden_size: usize) -> TrajResult<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let bound = 1.0 / (hidden_size as f32).sqrt();
        let uniform = Uniform::new_inclusive(-bound, bound);
        let normal = Normal::new(0.0f32, OUTPUT_WEIGHT_STDDEV)
            .map_err(|e| TrajError::invalid_config(e.to_string()))?;

        for (name, var) in &self.entries {
            let n = var.elem_count();
            let values: Vec<f32> = if name.ends_with(".weight") {
                (0..n)
                    .map(|_| loop {
                        let v = normal.sample(&mut rng);
                        if v.abs() <= 2.0 * OUTPUT_WEIGHT_STDDEV {
                            break v;
                        }
                    })
                    .collect()
            } else if name.ends_with(".bias") {
                vec![OUTPUT_BIAS_INIT; n]
            } else if name.contains("weight_") {
                (0..n).map(|_| uniform.sample(&mut rng)).collect()
            } else if name.contains("bias_ih") {
                // Gate layout is [input, forget, cell, output].
                let mut v = vec![0.0f32; n];
                let gate = n / 4;
                v[gate..2 * gate].fill(FORGET_BIAS);
                v
            } else {
                vec![0.0f32; n]
            };
            let tensor = Tensor::from_vec(values, var.shape().clone(), var.device())?;
            var.set(&tensor)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(n, v)| (n, v.dims())))
            .finish()
    }
}
