//! Autoregressive trajectory sampling.
//!
//! Sampling runs with batch size 1 in two phases:
//!
//! 1. **Warm-up**: replay every observed point except the last through the
//!    LSTM from a zero state, keeping only the state.
//! 2. **Generation**: feed the last point, turn the projection into a
//!    bivariate Gaussian, draw the next point, and feed it back. Repeat.
//!
//! The model is only borrowed immutably, so several samplers may share one
//! model across threads.

use candle_core::Device;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{TrajError, TrajResult};
use crate::gaussian::GaussianParams;
use crate::model::TrajModel;
use crate::recurrent::LstmState;
use crate::trajectory::{Point, Trajectory};

/// Draws continuations of observed trajectories from a trained model.
pub struct Sampler<'a> {
    model: &'a TrajModel,
    rng: ChaCha8Rng,
}

impl<'a> Sampler<'a> {
    /// Sampler with its own generator seeded from `seed`.
    pub fn new(model: &'a TrajModel, seed: u64) -> Self {
        Self {
            model,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Observed trajectory followed by `num_steps` sampled points.
    pub fn sample(&mut self, observed: &[Point], num_steps: usize) -> TrajResult<Trajectory> {
        sample_with_rng(self.model, observed, num_steps, &mut self.rng)
    }

    /// Like [`Sampler::sample`], also returning the distribution each
    /// generated point was drawn from.
    pub fn sample_with_params(
        &mut self,
        observed: &[Point],
        num_steps: usize,
    ) -> TrajResult<(Trajectory, Vec<GaussianParams>)> {
        generate(self.model, observed, num_steps, &mut self.rng)
    }
}

/// Sample with a caller-provided random generator.
pub fn sample_with_rng<R: Rng + ?Sized>(
    model: &TrajModel,
    observed: &[Point],
    num_steps: usize,
    rng: &mut R,
) -> TrajResult<Trajectory> {
    generate(model, observed, num_steps, rng).map(|(traj, _)| traj)
}

/// Replay `points` from a zero state and return the resulting state.
pub fn warm_up(model: &TrajModel, points: &[Point]) -> TrajResult<LstmState> {
    let device: &Device = model.device();
    let mut state = model.zero_state(1)?;
    for point in points {
        let input = point.to_tensor(device)?;
        let (next, _) = model.step(&input, &state)?;
        state = next;
    }
    Ok(state)
}

fn generate<R: Rng + ?Sized>(
    model: &TrajModel,
    observed: &[Point],
    num_steps: usize,
    rng: &mut R,
) -> TrajResult<(Trajectory, Vec<GaussianParams>)> {
    let Some((&last, history)) = observed.split_last() else {
        return Err(TrajError::invalid_trajectory(
            "seed trajectory needs at least one point",
        ));
    };

    let mut trajectory = observed.to_vec();
    let mut predicted = Vec::with_capacity(num_steps);
    if num_steps == 0 {
        return Ok((trajectory, predicted));
    }

    let mut state = warm_up(model, history)?;
    let mut current = last;
    for step in 0..num_steps {
        let (next_state, params) = model.predict_next(current, &state)?;
        let point = params.sample(rng);
        tracing::trace!(
            step,
            x = point.x,
            y = point.y,
            sigma_x = params.sigma_x,
            sigma_y = params.sigma_y,
            rho = params.rho,
            "sampled point"
        );
        trajectory.push(point);
        predicted.push(params);
        state = next_state;
        current = point;
    }

    tracing::debug!(
        observed = observed.len(),
        generated = num_steps,
        "trajectory sampled"
    );
    Ok((trajectory, predicted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrajConfig;

    fn model() -> TrajModel {
        TrajModel::new(&TrajConfig::test().inference(), &Device::Cpu).unwrap()
    }

    fn seed_traj() -> Vec<Point> {
        vec![Point::new(0.0, 0.0), Point::new(0.5, 0.2), Point::new(1.0, 0.4)]
    }

    #[test]
    fn test_zero_steps_returns_seed() {
        let model = model();
        let traj = seed_traj();
        let out = Sampler::new(&model, 1).sample(&traj, 0).unwrap();
        assert_eq!(out, traj);
    }

    #[test]
    fn test_empty_seed_rejected() {
        let model = model();
        let err = Sampler::new(&model, 1).sample(&[], 3).unwrap_err();
        assert!(matches!(err, TrajError::InvalidTrajectory(_)));
    }

    #[test]
    fn test_single_point_seed() {
        let model = model();
        let out = Sampler::new(&model, 1)
            .sample(&[Point::new(2.0, -1.0)], 4)
            .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], Point::new(2.0, -1.0));
    }

    #[test]
    fn test_same_seed_bit_identical() {
        let model = model();
        let traj = seed_traj();
        let a = Sampler::new(&model, 77).sample(&traj, 6).unwrap();
        let b = Sampler::new(&model, 77).sample(&traj, 6).unwrap();
        let bits = |t: &[Point]| -> Vec<(u32, u32)> {
            t.iter().map(|p| (p.x.to_bits(), p.y.to_bits())).collect()
        };
        assert_eq!(bits(&a), bits(&b));

        let c = Sampler::new(&model, 78).sample(&traj, 6).unwrap();
        assert_ne!(bits(&a), bits(&c));
    }

    #[test]
    fn test_warm_up_matches_step_chain() {
        let model = model();
        let traj = seed_traj();
        let state = warm_up(&model, &traj[..2]).unwrap();

        let mut manual = model.zero_state(1).unwrap();
        for p in &traj[..2] {
            manual = model.step(&p.to_tensor(&Device::Cpu).unwrap(), &manual).unwrap().0;
        }
        assert_eq!(
            state.h().to_vec2::<f32>().unwrap(),
            manual.h().to_vec2::<f32>().unwrap()
        );
        assert_eq!(
            state.c().to_vec2::<f32>().unwrap(),
            manual.c().to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_first_generated_uses_warm_state() {
        // The first prediction must condition on the whole seed, so it
        // differs from a prediction made from the last point alone.
        let model = model();
        let traj = seed_traj();
        let (_, params) = Sampler::new(&model, 5).sample_with_params(&traj, 1).unwrap();

        let cold = model.zero_state(1).unwrap();
        let (_, from_cold) = model.predict_next(traj[2], &cold).unwrap();
        let warm = warm_up(&model, &traj[..2]).unwrap();
        let (_, from_warm) = model.predict_next(traj[2], &warm).unwrap();

        assert_eq!(params[0], from_warm);
        assert_ne!(params[0], from_cold);
    }
}
