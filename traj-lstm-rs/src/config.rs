//! Model and optimization configuration for the trajectory LSTM.
//!
//! One [`TrajConfig`] describes a training configuration: the recurrent width,
//! the fixed batch geometry, and the optimizer knobs. Inference mode collapses
//! the batch geometry to a single one-step example.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrajError, TrajResult};

/// Configuration for the trajectory model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajConfig {
    /// Dimension of the LSTM hidden state (R)
    pub hidden_size: usize,
    /// Timesteps per training sequence
    pub seq_length: usize,
    /// Trajectories per training batch
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f32,
    /// Maximum global L2 norm of the gradient
    pub grad_clip: f32,
    /// Per-epoch multiplicative learning rate decay
    pub decay_rate: f32,
    /// Seed for parameter initialization
    pub seed: u64,
    /// Single-step, single-example operation
    pub inference: bool,
}

impl Default for TrajConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            seq_length: 5,
            batch_size: 50,
            learning_rate: 0.005,
            grad_clip: 10.0,
            decay_rate: 0.95,
            seed: 42,
            inference: false,
        }
    }
}

impl TrajConfig {
    /// Tiny configuration for unit tests
    pub fn test() -> Self {
        Self {
            hidden_size: 16,
            seq_length: 4,
            batch_size: 2,
            learning_rate: 0.01,
            grad_clip: 10.0,
            decay_rate: 0.95,
            seed: 7,
            inference: false,
        }
    }

    /// Copy of this configuration switched to inference mode.
    pub fn inference(&self) -> Self {
        Self {
            inference: true,
            ..self.clone()
        }
        .effective()
    }

    /// Set the hidden size.
    #[must_use]
    pub const fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set the batch geometry.
    #[must_use]
    pub const fn with_batch(mut self, batch_size: usize, seq_length: usize) -> Self {
        self.batch_size = batch_size;
        self.seq_length = seq_length;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub const fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the gradient clipping norm.
    #[must_use]
    pub const fn with_grad_clip(mut self, grad_clip: f32) -> Self {
        self.grad_clip = grad_clip;
        self
    }

    /// Set the initialization seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The configuration actually used by the model.
    ///
    /// Inference mode forces `batch_size = 1` and `seq_length = 1`.
    pub fn effective(&self) -> Self {
        let mut config = self.clone();
        if config.inference {
            config.batch_size = 1;
            config.seq_length = 1;
        }
        config
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> TrajResult<()> {
        if self.hidden_size == 0 {
            return Err(TrajError::invalid_config("hidden_size must be > 0"));
        }
        if self.seq_length == 0 || self.batch_size == 0 {
            return Err(TrajError::invalid_config(format!(
                "batch geometry must be non-empty, got batch_size={} seq_length={}",
                self.batch_size, self.seq_length
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrajError::invalid_config(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.grad_clip.is_finite() && self.grad_clip > 0.0) {
            return Err(TrajError::invalid_config(format!(
                "grad_clip must be finite and > 0, got {}",
                self.grad_clip
            )));
        }
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(TrajError::invalid_config(format!(
                "decay_rate must be in (0, 1], got {}",
                self.decay_rate
            )));
        }
        Ok(())
    }

    /// Learning rate after `epoch` rounds of exponential decay.
    pub fn learning_rate_for_epoch(&self, epoch: usize) -> f32 {
        self.learning_rate * self.decay_rate.powi(epoch as i32)
    }

    /// Number of trainable scalars: LSTM gates plus the 5-way output projection.
    pub fn parameter_count(&self) -> usize {
        let h = self.hidden_size;
        let lstm = 4 * h * (crate::recurrent::POINT_DIM + h) + 2 * 4 * h;
        let projection = crate::model::OUTPUT_SIZE * h + crate::model::OUTPUT_SIZE;
        lstm + projection
    }

    /// Save as pretty JSON.
    pub fn save_json(&self, path: &Path) -> TrajResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON and validate.
    pub fn load_json(path: &Path) -> TrajResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
