//! Trajectory model: recurrent core, output projection and Gaussian head.
//!
//! Implements the full model with:
//! - Single-layer LSTM over 2D points ([`RecurrentCore`])
//! - Linear projection to five raw distribution parameters per timestep
//! - Bivariate Gaussian negative log-likelihood over every timestep
//! - Safetensors persistence of every trainable weight

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Init, Linear, VarBuilder, VarMap};

use crate::config::TrajConfig;
use crate::error::TrajResult;
use crate::gaussian::{sequence_nll, GaussianParams};
use crate::params::ParameterSet;
use crate::recurrent::{InputStage, LstmState, RawCoordinates, RecurrentCore};
use crate::trajectory::{Point, TrajBatch};

/// Raw outputs per timestep: mu_x, mu_y, sigma_x, sigma_y, rho.
pub const OUTPUT_SIZE: usize = 5;

/// The recurrent trajectory model.
pub struct TrajModel {
    core: RecurrentCore,
    output: Linear,
    config: TrajConfig,
    device: Device,
    /// VarMap owning every trainable tensor
    var_map: VarMap,
}

impl TrajModel {
    /// Create a new model with seeded initialization.
    pub fn new(config: &TrajConfig, device: &Device) -> TrajResult<Self> {
        Self::with_input_stage(config, Box::new(RawCoordinates), device)
    }

    /// Create a model whose points pass through `input_stage` before the LSTM.
    pub fn with_input_stage(
        config: &TrajConfig,
        input_stage: Box<dyn InputStage>,
        device: &Device,
    ) -> TrajResult<Self> {
        let model = Self::build(config, input_stage, VarMap::new(), device)?;
        model
            .parameters()?
            .initialize(model.config.seed, model.config.hidden_size)?;
        tracing::info!(
            hidden_size = model.config.hidden_size,
            batch_size = model.config.batch_size,
            seq_length = model.config.seq_length,
            inference = model.config.inference,
            parameters = model.config.parameter_count(),
            "trajectory model initialized"
        );
        Ok(model)
    }

    fn build(
        config: &TrajConfig,
        input_stage: Box<dyn InputStage>,
        var_map: VarMap,
        device: &Device,
    ) -> TrajResult<Self> {
        config.validate()?;
        let config = config.effective();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let core = RecurrentCore::new(config.hidden_size, input_stage, vb.pp("lstm"))?;

        let out_vb = vb.pp("output");
        let weight = out_vb.get_with_hints(
            (OUTPUT_SIZE, config.hidden_size),
            "weight",
            Init::Const(0.0),
        )?;
        let bias = out_vb.get_with_hints(OUTPUT_SIZE, "bias", Init::Const(0.0))?;
        let output = Linear::new(weight, Some(bias));

        Ok(Self {
            core,
            output,
            config,
            device: device.clone(),
            var_map,
        })
    }

    /// Zeroed hidden state for `batch` sequences.
    pub fn zero_state(&self, batch: usize) -> TrajResult<LstmState> {
        self.core.zero_state(batch)
    }

    /// One timestep: feed `(batch, 2)` points, get the new state and the
    /// `(batch, 5)` raw distribution parameters.
    pub fn step(&self, points: &Tensor, state: &LstmState) -> TrajResult<(LstmState, Tensor)> {
        let state = self.core.step(points, state)?;
        let raw = self.output.forward(state.h())?;
        Ok((state, raw))
    }

    /// Single-point convenience over [`TrajModel::step`] for batch size 1.
    pub fn predict_next(
        &self,
        point: Point,
        state: &LstmState,
    ) -> TrajResult<(LstmState, GaussianParams)> {
        let input = point.to_tensor(&self.device)?;
        let (state, raw) = self.step(&input, state)?;
        let raw = raw.flatten_all()?.to_vec1::<f32>()?;
        let params = GaussianParams::from_raw([
            raw[0] as f64,
            raw[1] as f64,
            raw[2] as f64,
            raw[3] as f64,
            raw[4] as f64,
        ]);
        Ok((state, params))
    }

    /// Unrolled forward pass over `(batch, seq_len, 2)` inputs.
    ///
    /// Returns `(batch * seq_len, 5)` raw parameters (row `b * seq_len + t`)
    /// and the final state.
    pub fn forward(&self, inputs: &Tensor, state: LstmState) -> TrajResult<(Tensor, LstmState)> {
        let (hidden, state) = self.core.unroll(inputs, state)?;
        let raw = self.output.forward(&hidden)?;
        Ok((raw, state))
    }

    /// Mean negative log-likelihood per (trajectory, timestep).
    ///
    /// Every timestep of the target contributes, not only the ones past an
    /// observation window.
    pub fn compute_loss(&self, raw: &Tensor, target: &Tensor) -> TrajResult<Tensor> {
        let (batch, seq_len, _) = target.dims3()?;
        let total = sequence_nll(raw, target)?;
        Ok((total / (batch * seq_len) as f64)?)
    }

    /// Validate the batch against the configuration and return the cost tensor.
    pub fn batch_loss(&self, batch: &TrajBatch) -> TrajResult<Tensor> {
        batch.validate(self.config.batch_size, self.config.seq_length)?;
        let state = self.zero_state(self.config.batch_size)?;
        let (raw, _) = self.forward(&batch.input, state)?;
        self.compute_loss(&raw, &batch.target)
    }

    /// Explicit list of every trainable variable.
    pub fn parameters(&self) -> TrajResult<ParameterSet> {
        ParameterSet::from_var_map(&self.var_map)
    }

    /// Get model configuration
    pub fn config(&self) -> &TrajConfig {
        &self.config
    }

    /// Get device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Save model weights to file (safetensors format).
    pub fn save(&self, path: &Path) -> TrajResult<()> {
        self.var_map.save(path)?;
        tracing::info!(path = %path.display(), "saved model weights");
        Ok(())
    }

    /// Load model weights from file (safetensors format).
    ///
    /// `config` must describe the saved model; its batch geometry may differ,
    /// so the same weights can be reopened in inference mode.
    pub fn load(config: &TrajConfig, path: &Path, device: &Device) -> TrajResult<Self> {
        let mut model = Self::build(config, Box::new(RawCoordinates), VarMap::new(), device)?;
        model.var_map.load(path)?;
        tracing::info!(path = %path.display(), "loaded model weights");
        Ok(model)
    }

    /// Load weights into this model from file (safetensors format).
    ///
    /// Every trainable variable must be present in the file with its shape.
    pub fn load_weights(&mut self, path: &Path) -> TrajResult<()> {
        self.var_map.load(path)?;
        tracing::info!(path = %path.display(), "reloaded model weights");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrajError;

    fn linear_batch(config: &TrajConfig, device: &Device) -> TrajBatch {
        let seqs: Vec<Vec<Point>> = (0..config.batch_size)
            .map(|b| {
                (0..=config.seq_length)
                    .map(|t| Point::new(0.1 * t as f32, 0.05 * b as f32 + 0.1 * t as f32))
                    .collect()
            })
            .collect();
        TrajBatch::next_step(&seqs, config.seq_length, device).unwrap()
    }

    #[test]
    fn test_model_forward_shapes() {
        let config = TrajConfig::test();
        let device = Device::Cpu;
        let model = TrajModel::new(&config, &device).unwrap();

        let batch = linear_batch(&config, &device);
        let state = model.zero_state(config.batch_size).unwrap();
        let (raw, last) = model.forward(&batch.input, state).unwrap();
        assert_eq!(
            raw.dims(),
            &[config.batch_size * config.seq_length, OUTPUT_SIZE]
        );
        assert_eq!(last.h().dims(), &[config.batch_size, config.hidden_size]);
    }

    #[test]
    fn test_initial_outputs_near_bias() {
        // Tiny projection weights keep the first predictions close to the 0.01 bias.
        let config = TrajConfig::test();
        let device = Device::Cpu;
        let model = TrajModel::new(&config, &device).unwrap();
        let state = model.zero_state(1).unwrap();
        let (_, params) = model.predict_next(Point::new(0.5, -0.5), &state).unwrap();
        assert!((params.mu_x - 0.01).abs() < 0.1);
        assert!((params.sigma_x - 1.0).abs() < 0.15);
        assert!(params.rho.abs() < 0.1);
    }

    #[test]
    fn test_model_loss_finite() {
        let config = TrajConfig::test();
        let device = Device::Cpu;
        let model = TrajModel::new(&config, &device).unwrap();
        let batch = linear_batch(&config, &device);

        let loss = model.batch_loss(&batch).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.is_finite());
        // sigma ~ 1 and small targets: close to ln(2*pi)
        assert!(loss > 1.5 && loss < 2.5, "loss {loss}");
    }

    #[test]
    fn test_loss_is_mean_of_summed_nll() {
        let config = TrajConfig::test();
        let device = Device::Cpu;
        let model = TrajModel::new(&config, &device).unwrap();
        let batch = linear_batch(&config, &device);

        let state = model.zero_state(config.batch_size).unwrap();
        let (raw, _) = model.forward(&batch.input, state).unwrap();
        let total = sequence_nll(&raw, &batch.target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let mean = model
            .compute_loss(&raw, &batch.target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let n = (config.batch_size * config.seq_length) as f32;
        assert!((total / n - mean).abs() < 1e-5);
    }

    #[test]
    fn test_batch_shape_rejected_before_compute() {
        let config = TrajConfig::test();
        let device = Device::Cpu;
        let model = TrajModel::new(&config, &device).unwrap();
        let wrong = TrajConfig::test().with_batch(config.batch_size + 1, config.seq_length);
        let batch = linear_batch(&wrong, &device);
        assert!(matches!(
            model.batch_loss(&batch),
            Err(TrajError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_inference_mode_geometry() {
        let mut config = TrajConfig::test();
        config.inference = true;
        let model = TrajModel::new(&config, &Device::Cpu).unwrap();
        assert_eq!(model.config().batch_size, 1);
        assert_eq!(model.config().seq_length, 1);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let config = TrajConfig::test();
        let a = TrajModel::new(&config, &Device::Cpu).unwrap();
        let b = TrajModel::new(&config, &Device::Cpu).unwrap();
        assert_eq!(
            a.parameters().unwrap().snapshot().unwrap(),
            b.parameters().unwrap().snapshot().unwrap()
        );
    }

    #[test]
    fn test_parameter_set_covers_all_weights() {
        let config = TrajConfig::test();
        let model = TrajModel::new(&config, &Device::Cpu).unwrap();
        let params = model.parameters().unwrap();
        let names: Vec<&str> = params.names().collect();
        assert_eq!(
            names,
            vec![
                "lstm.bias_hh_l0",
                "lstm.bias_ih_l0",
                "lstm.weight_hh_l0",
                "lstm.weight_ih_l0",
                "output.bias",
                "output.weight",
            ]
        );
        assert_eq!(params.element_count(), config.parameter_count());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let config = TrajConfig::test();
        let device = Device::Cpu;
        let model = TrajModel::new(&config, &device).unwrap();
        model.save(&path).unwrap();

        let loaded = TrajModel::load(&config.inference(), &path, &device).unwrap();
        assert_eq!(
            model.parameters().unwrap().snapshot().unwrap(),
            loaded.parameters().unwrap().snapshot().unwrap()
        );

        let mut other = TrajModel::new(&config.clone().with_seed(1234), &device).unwrap();
        assert_ne!(
            model.parameters().unwrap().snapshot().unwrap(),
            other.parameters().unwrap().snapshot().unwrap()
        );
        other.load_weights(&path).unwrap();
        assert_eq!(
            model.parameters().unwrap().snapshot().unwrap(),
            other.parameters().unwrap().snapshot().unwrap()
        );
    }
}
