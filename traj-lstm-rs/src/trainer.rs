//! Training step: loss, backward, global-norm clipping and Adam.
//!
//! The trainer only needs a [`TrainableModel`]: something that exposes its
//! parameters and turns a batch into a differentiable cost. Each call to
//! [`TrajTrainer::train_step`] is one atomic update. It borrows the trainer
//! mutably, so two steps can never touch the same parameters at once.

use std::collections::HashMap;

use candle_core::{DType, Tensor};

use crate::config::TrajConfig;
use crate::error::{TrajError, TrajResult};
use crate::model::TrajModel;
use crate::params::ParameterSet;
use crate::trajectory::TrajBatch;

/// A model the trainer can optimize.
pub trait TrainableModel {
    /// Every variable the optimizer updates.
    fn parameters(&self) -> TrajResult<ParameterSet>;

    /// Scalar cost for `batch`, still attached to the autodiff graph.
    fn loss(&self, batch: &TrajBatch) -> TrajResult<Tensor>;

    /// `(batch_size, seq_length)` the model accepts.
    fn batch_geometry(&self) -> (usize, usize);
}

impl TrainableModel for TrajModel {
    fn parameters(&self) -> TrajResult<ParameterSet> {
        TrajModel::parameters(self)
    }

    fn loss(&self, batch: &TrajBatch) -> TrajResult<Tensor> {
        self.batch_loss(batch)
    }

    fn batch_geometry(&self) -> (usize, usize) {
        (self.config().batch_size, self.config().seq_length)
    }
}

/// Global L2 norm over a set of gradient tensors.
pub fn global_norm(grads: &HashMap<String, Tensor>) -> TrajResult<f32> {
    let mut norm_sq = 0.0f64;
    for grad in grads.values() {
        let sq: f32 = grad.sqr()?.sum_all()?.to_scalar()?;
        norm_sq += sq as f64;
    }
    Ok(norm_sq.sqrt() as f32)
}

/// Rescale `grads` so their global norm is at most `max_norm`.
///
/// Every tensor is multiplied by `max_norm / max(global_norm, max_norm)`, so
/// the direction is preserved. Returns the pre-clip norm and the scale used.
pub fn clip_by_global_norm(
    grads: &mut HashMap<String, Tensor>,
    max_norm: f32,
) -> TrajResult<(f32, f32)> {
    let norm = global_norm(grads)?;
    if !norm.is_finite() {
        return Ok((norm, f32::NAN));
    }
    let scale = max_norm / norm.max(max_norm);
    if scale < 1.0 {
        for grad in grads.values_mut() {
            *grad = (&*grad * scale as f64)?;
        }
    }
    Ok((norm, scale))
}

/// Adam optimizer with bias-corrected moments.
pub struct TrajOptimizer {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    /// First moment estimates
    m: HashMap<String, Tensor>,
    /// Second moment estimates
    v: HashMap<String, Tensor>,
    /// Step counter for bias correction
    t: usize,
}

impl TrajOptimizer {
    /// Create a new Adam optimizer
    pub fn new(lr: f32) -> Self {
        Self::with_params(lr, 0.9, 0.999, 1e-8)
    }

    /// Create optimizer with custom hyperparameters
    pub fn with_params(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            learning_rate: lr,
            beta1,
            beta2,
            eps,
            m: HashMap::new(),
            v: HashMap::new(),
            t: 0,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.t
    }

    /// Apply one update to every parameter that has a gradient.
    pub fn step(
        &mut self,
        params: &ParameterSet,
        grads: &HashMap<String, Tensor>,
    ) -> TrajResult<()> {
        self.t += 1;

        // Bias correction factors
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for (name, var) in params.iter() {
            let Some(grad) = grads.get(name) else {
                continue;
            };

            let m = match self.m.get(name) {
                Some(m) => m.clone(),
                None => Tensor::zeros(var.shape().clone(), DType::F32, var.device())?,
            };
            let v = match self.v.get(name) {
                Some(v) => v.clone(),
                None => Tensor::zeros(var.shape().clone(), DType::F32, var.device())?,
            };

            // m = β1 * m + (1 - β1) * g
            let m_new = ((&m * self.beta1 as f64)? + (grad * (1.0 - self.beta1) as f64)?)?;
            // v = β2 * v + (1 - β2) * g²
            let v_new = ((&v * self.beta2 as f64)? + (grad.sqr()? * (1.0 - self.beta2) as f64)?)?;

            let m_hat = (&m_new / bc1 as f64)?;
            let v_hat = (&v_new / bc2 as f64)?;

            // lr * m_hat / (sqrt(v_hat) + eps)
            let denom = (v_hat.sqrt()? + self.eps as f64)?;
            let update = ((m_hat / denom)? * self.learning_rate as f64)?;

            let new_w = (var.as_tensor() - &update)?;
            var.set(&new_w)?;

            self.m.insert(name.to_string(), m_new);
            self.v.insert(name.to_string(), v_new);
        }

        Ok(())
    }
}

/// What one training step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// 1-based index of this update
    pub step: usize,
    /// Mean NLL per (trajectory, timestep) before the update
    pub cost: f32,
    /// Global gradient norm before clipping
    pub gradient_norm: f32,
    /// Factor applied to the gradients (1.0 when not clipped)
    pub clip_scale: f32,
}

/// Runs training steps for one model.
pub struct TrajTrainer<M: TrainableModel = TrajModel> {
    model: M,
    optimizer: TrajOptimizer,
    grad_clip: f32,
}

impl TrajTrainer<TrajModel> {
    /// Build a model from `config` and wrap it in a trainer.
    pub fn from_config(config: &TrajConfig, device: &candle_core::Device) -> TrajResult<Self> {
        let model = TrajModel::new(config, device)?;
        Self::new(model, config)
    }
}

impl<M: TrainableModel> TrajTrainer<M> {
    /// Wrap `model` using the learning rate and clip norm of `config`.
    ///
    /// `config` must describe the same batch geometry the model was built with.
    pub fn new(model: M, config: &TrajConfig) -> TrajResult<Self> {
        config.validate()?;
        if config.inference {
            return Err(TrajError::invalid_config(
                "cannot train a model configured for inference",
            ));
        }
        let (batch_size, seq_length) = model.batch_geometry();
        if (config.batch_size, config.seq_length) != (batch_size, seq_length) {
            return Err(TrajError::invalid_config(format!(
                "trainer geometry {}x{} differs from model geometry {}x{}",
                config.batch_size, config.seq_length, batch_size, seq_length
            )));
        }
        Ok(Self {
            model,
            optimizer: TrajOptimizer::new(config.learning_rate),
            grad_clip: config.grad_clip,
        })
    }

    /// Replace the optimizer, e.g. to change Adam hyperparameters.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: TrajOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    /// Set the learning rate used by the next steps.
    pub fn set_learning_rate(&mut self, lr: f32) {
        self.optimizer.set_learning_rate(lr);
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.optimizer.steps()
    }

    /// One update: cost, gradients, clipping, Adam.
    ///
    /// A non-finite cost or gradient norm fails the step with
    /// [`TrajError::NonFinite`] and leaves the parameters untouched.
    pub fn train_step(&mut self, batch: &TrajBatch) -> TrajResult<StepOutcome> {
        let step = self.optimizer.steps() + 1;
        let params = self.model.parameters()?;

        let loss = self.model.loss(batch)?;
        let cost: f32 = loss.to_scalar()?;
        if !cost.is_finite() {
            tracing::warn!(step, cost, "non-finite cost, skipping update");
            return Err(TrajError::non_finite(step, format!("cost = {cost}")));
        }

        let grad_store = loss.backward()?;
        let mut grads = params.gradients(&grad_store)?;

        let (gradient_norm, clip_scale) = clip_by_global_norm(&mut grads, self.grad_clip)?;
        if !gradient_norm.is_finite() {
            tracing::warn!(step, cost, gradient_norm, "non-finite gradients, skipping update");
            return Err(TrajError::non_finite(
                step,
                format!("gradient norm = {gradient_norm}"),
            ));
        }

        self.optimizer.step(&params, &grads)?;

        tracing::debug!(
            step,
            cost,
            gradient_norm,
            clip_scale,
            lr = self.optimizer.learning_rate(),
            "train step"
        );

        Ok(StepOutcome {
            step,
            cost,
            gradient_norm,
            clip_scale,
        })
    }
}
