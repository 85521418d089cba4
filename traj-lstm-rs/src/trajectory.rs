//! Points, trajectories and training batches.

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{TrajError, TrajResult};

/// A 2D position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Single point as a `(1, 2)` tensor.
    pub fn to_tensor(self, device: &Device) -> TrajResult<Tensor> {
        Ok(Tensor::from_slice(&[self.x, self.y], (1, 2), device)?)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Time-ordered sequence of positions.
pub type Trajectory = Vec<Point>;

/// Flatten equally long trajectories into a `(batch, len, 2)` tensor.
fn stack_trajectories(trajectories: &[Trajectory], device: &Device) -> TrajResult<Tensor> {
    let len = match trajectories.first() {
        Some(first) if !first.is_empty() => first.len(),
        _ => return Err(TrajError::invalid_trajectory("batch has no points")),
    };

    let mut flat = Vec::with_capacity(trajectories.len() * len * 2);
    for (i, traj) in trajectories.iter().enumerate() {
        if traj.len() != len {
            return Err(TrajError::invalid_trajectory(format!(
                "trajectory {} has {} points, expected {}",
                i,
                traj.len(),
                len
            )));
        }
        for p in traj {
            flat.push(p.x);
            flat.push(p.y);
        }
    }

    Ok(Tensor::from_vec(flat, (trajectories.len(), len, 2), device)?)
}

/// A training batch of (input, target) point sequences.
#[derive(Debug, Clone)]
pub struct TrajBatch {
    /// Input points: (batch_size, seq_len, 2)
    pub input: Tensor,
    /// Target points: (batch_size, seq_len, 2)
    pub target: Tensor,
}

impl TrajBatch {
    /// Wrap existing tensors. Shapes are checked against the configuration
    /// when the batch is consumed.
    pub fn new(input: Tensor, target: Tensor) -> Self {
        Self { input, target }
    }

    /// Build a batch from parallel input and target trajectories.
    pub fn from_trajectories(
        inputs: &[Trajectory],
        targets: &[Trajectory],
        device: &Device,
    ) -> TrajResult<Self> {
        if inputs.len() != targets.len() {
            return Err(TrajError::shape_mismatch(
                format!("{} target trajectories", inputs.len()),
                format!("{}", targets.len()),
            ));
        }
        let input = stack_trajectories(inputs, device)?;
        let target = stack_trajectories(targets, device)?;
        Ok(Self::new(input, target))
    }

    /// Pair points `0..seq_length` with points `1..=seq_length` of each sequence.
    pub fn next_step(
        sequences: &[Trajectory],
        seq_length: usize,
        device: &Device,
    ) -> TrajResult<Self> {
        let mut inputs = Vec::with_capacity(sequences.len());
        let mut targets = Vec::with_capacity(sequences.len());
        for (i, seq) in sequences.iter().enumerate() {
            if seq.len() < seq_length + 1 {
                return Err(TrajError::invalid_trajectory(format!(
                    "sequence {} has {} points, need at least {}",
                    i,
                    seq.len(),
                    seq_length + 1
                )));
            }
            inputs.push(seq[..seq_length].to_vec());
            targets.push(seq[1..=seq_length].to_vec());
        }
        Self::from_trajectories(&inputs, &targets, device)
    }

    pub fn batch_size(&self) -> usize {
        self.input.dims().first().copied().unwrap_or(0)
    }

    pub fn seq_length(&self) -> usize {
        self.input.dims().get(1).copied().unwrap_or(0)
    }

    /// Reject the batch unless both tensors are `(batch_size, seq_length, 2)` f32.
    pub fn validate(&self, batch_size: usize, seq_length: usize) -> TrajResult<()> {
        let expected = [batch_size, seq_length, 2];
        for (name, t) in [("input", &self.input), ("target", &self.target)] {
            if t.dims() != expected {
                return Err(TrajError::shape_mismatch(
                    format!("{} {:?}", name, expected),
                    format!("{:?}", t.dims()),
                ));
            }
            if t.dtype() != DType::F32 {
                return Err(TrajError::shape_mismatch(
                    format!("{} dtype F32", name),
                    format!("{:?}", t.dtype()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, dx: f32) -> Trajectory {
        (0..n).map(|i| Point::new(i as f32 * dx, 0.5)).collect()
    }

    #[test]
    fn test_from_trajectories_shape() {
        let device = Device::Cpu;
        let walks = [line(3, 1.0), line(3, 2.0)];
        let batch = TrajBatch::from_trajectories(&walks, &walks, &device).unwrap();
        assert_eq!(batch.input.dims(), &[2, 3, 2]);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_length(), 3);
        assert!(batch.validate(2, 3).is_ok());

        let v: Vec<Vec<Vec<f32>>> = batch.input.to_vec3().unwrap();
        assert_eq!(v[1][2], vec![4.0, 0.5]);
    }

    #[test]
    fn test_ragged_batch_rejected() {
        let device = Device::Cpu;
        let inputs = [line(3, 1.0), line(2, 1.0)];
        let targets = [line(3, 1.0), line(3, 1.0)];
        let res = TrajBatch::from_trajectories(&inputs, &targets, &device);
        assert!(matches!(res, Err(TrajError::InvalidTrajectory(_))));

        let res = TrajBatch::from_trajectories(&[], &[], &device);
        assert!(res.is_err());
    }

    #[test]
    fn test_next_step_shifts_by_one() {
        let device = Device::Cpu;
        let batch = TrajBatch::next_step(&[line(5, 1.0)], 4, &device).unwrap();
        let input: Vec<Vec<Vec<f32>>> = batch.input.to_vec3().unwrap();
        let target: Vec<Vec<Vec<f32>>> = batch.target.to_vec3().unwrap();
        assert_eq!(input[0][0][0], 0.0);
        assert_eq!(target[0][0][0], 1.0);
        assert_eq!(target[0][3][0], 4.0);

        assert!(TrajBatch::next_step(&[line(4, 1.0)], 4, &device).is_err());
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let device = Device::Cpu;
        let batch = TrajBatch::next_step(&[line(6, 1.0)], 5, &device).unwrap();
        let err = batch.validate(2, 5).unwrap_err();
        assert!(matches!(err, TrajError::ShapeMismatch { .. }));
    }
}
