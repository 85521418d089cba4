//! Recurrent core: a single-layer LSTM driven one timestep at a time.
//!
//! Hidden state is an explicit [`LstmState`] value. Callers create it with
//! [`RecurrentCore::zero_state`] for whatever batch size they need and thread
//! it through [`RecurrentCore::step`]. Nothing is cached inside the core, so
//! one model can serve any number of independent sequences.

use candle_core::Tensor;
use candle_nn::rnn::LSTMState;
use candle_nn::{lstm, LSTMConfig, VarBuilder, LSTM, RNN};

use crate::error::{TrajError, TrajResult};

/// Width of one input point.
pub const POINT_DIM: usize = 2;

/// Per-sequence LSTM memory: hidden `h` and cell `c`, each `(batch, hidden)`.
pub type LstmState = LSTMState;

/// Transformation applied to raw points before they reach the LSTM.
///
/// This is where a coordinate embedding or a pooling of neighbouring agents
/// would plug in. The default stage passes coordinates through untouched.
pub trait InputStage: Send + Sync {
    /// Feature width produced by [`InputStage::forward`].
    fn output_dim(&self) -> usize;

    /// Map `(batch, 2)` points to `(batch, output_dim)` features.
    fn forward(&self, points: &Tensor) -> TrajResult<Tensor>;
}

/// Identity input stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCoordinates;

impl InputStage for RawCoordinates {
    fn output_dim(&self) -> usize {
        POINT_DIM
    }

    fn forward(&self, points: &Tensor) -> TrajResult<Tensor> {
        Ok(points.clone())
    }
}

/// Single-layer LSTM over input-stage features.
pub struct RecurrentCore {
    cell: LSTM,
    input_stage: Box<dyn InputStage>,
    hidden_size: usize,
}

impl RecurrentCore {
    /// Build the LSTM variables under `vb` (`weight_ih_l0`, `weight_hh_l0`,
    /// `bias_ih_l0`, `bias_hh_l0`).
    pub fn new(
        hidden_size: usize,
        input_stage: Box<dyn InputStage>,
        vb: VarBuilder,
    ) -> TrajResult<Self> {
        let cell = lstm(
            input_stage.output_dim(),
            hidden_size,
            LSTMConfig::default(),
            vb,
        )?;
        Ok(Self {
            cell,
            input_stage,
            hidden_size,
        })
    }

    /// Width R of the raw recurrent output.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Zeroed state for `batch` independent sequences.
    pub fn zero_state(&self, batch: usize) -> TrajResult<LstmState> {
        Ok(self.cell.zero_state(batch)?)
    }

    /// Advance every sequence by one timestep.
    ///
    /// `points` is `(batch, 2)`. The raw output of the step is the new hidden
    /// vector, available as `state.h()`.
    pub fn step(&self, points: &Tensor, state: &LstmState) -> TrajResult<LstmState> {
        let (batch, width) = points.dims2()?;
        let (state_batch, _) = state.h().dims2()?;
        if width != POINT_DIM || batch != state_batch {
            return Err(TrajError::shape_mismatch(
                format!("({}, {})", state_batch, POINT_DIM),
                format!("({}, {})", batch, width),
            ));
        }
        let features = self.input_stage.forward(points)?;
        Ok(self.cell.step(&features, state)?)
    }

    /// Run a whole `(batch, seq_len, 2)` block through the cell in time order.
    ///
    /// Returns the raw outputs stacked as `(batch * seq_len, hidden)`, row
    /// `b * seq_len + t`, and the state after the last timestep.
    pub fn unroll(&self, inputs: &Tensor, state: LstmState) -> TrajResult<(Tensor, LstmState)> {
        let (batch, seq_len, _) = inputs.dims3()?;
        let mut state = state;
        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let points = inputs.narrow(1, t, 1)?.squeeze(1)?;
            state = self.step(&points, &state)?;
            outputs.push(state.h().clone());
        }
        let stacked = Tensor::stack(&outputs, 1)?;
        let flat = stacked.reshape((batch * seq_len, self.hidden_size))?;
        Ok((flat, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn core(hidden: usize) -> (RecurrentCore, VarMap) {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let core = RecurrentCore::new(hidden, Box::new(RawCoordinates), vb.pp("lstm")).unwrap();
        (core, var_map)
    }

    #[test]
    fn test_zero_state_any_batch() {
        let (core, _vm) = core(8);
        for batch in [1, 3, 17] {
            let state = core.zero_state(batch).unwrap();
            assert_eq!(state.h().dims(), &[batch, 8]);
            assert_eq!(state.c().dims(), &[batch, 8]);
            let sum: f32 = state.h().abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
            assert_eq!(sum, 0.0);
        }
    }

    #[test]
    fn test_step_changes_state() {
        let (core, _vm) = core(8);
        let state = core.zero_state(2).unwrap();
        let points = Tensor::from_slice(&[1.0f32, 2.0, -1.0, 0.5], (2, 2), &Device::Cpu).unwrap();
        let next = core.step(&points, &state).unwrap();
        assert_eq!(next.h().dims(), &[2, 8]);
        let diff: f32 = next.c().abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_step_rejects_batch_mismatch() {
        let (core, _vm) = core(4);
        let state = core.zero_state(3).unwrap();
        let points = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            core.step(&points, &state),
            Err(TrajError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_unroll_matches_manual_steps() {
        let (core, _vm) = core(6);
        let device = Device::Cpu;
        let data: Vec<f32> = (0..2 * 3 * 2).map(|i| i as f32 * 0.1).collect();
        let inputs = Tensor::from_vec(data, (2, 3, 2), &device).unwrap();

        let (outputs, last) = core.unroll(&inputs, core.zero_state(2).unwrap()).unwrap();
        assert_eq!(outputs.dims(), &[6, 6]);

        let mut state = core.zero_state(2).unwrap();
        let mut manual = Vec::new();
        for t in 0..3 {
            let p = inputs.narrow(1, t, 1).unwrap().squeeze(1).unwrap();
            state = core.step(&p, &state).unwrap();
            manual.push(state.h().to_vec2::<f32>().unwrap());
        }

        let rows = outputs.to_vec2::<f32>().unwrap();
        for b in 0..2 {
            for t in 0..3 {
                assert_eq!(rows[b * 3 + t], manual[t][b]);
            }
        }
        assert_eq!(
            last.h().to_vec2::<f32>().unwrap(),
            state.h().to_vec2::<f32>().unwrap()
        );
    }

    struct Scaled(f64);

    impl InputStage for Scaled {
        fn output_dim(&self) -> usize {
            POINT_DIM
        }

        fn forward(&self, points: &Tensor) -> TrajResult<Tensor> {
            Ok((points * self.0)?)
        }
    }

    #[test]
    fn test_custom_input_stage() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let core = RecurrentCore::new(4, Box::new(Scaled(0.0)), vb).unwrap();

        // A zero-scaling stage makes every input look identical.
        let a = Tensor::from_slice(&[5.0f32, -3.0], (1, 2), &Device::Cpu).unwrap();
        let b = Tensor::from_slice(&[0.1f32, 9.0], (1, 2), &Device::Cpu).unwrap();
        let s = core.zero_state(1).unwrap();
        let ha = core.step(&a, &s).unwrap().h().to_vec2::<f32>().unwrap();
        let hb = core.step(&b, &s).unwrap().h().to_vec2::<f32>().unwrap();
        assert_eq!(ha, hb);
    }
}
