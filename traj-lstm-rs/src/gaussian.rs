//! Bivariate Gaussian head: parameter transform, density and NLL loss.
//!
//! The output projection produces five unconstrained values per timestep,
//! `(z_mux, z_muy, z_sx, z_sy, z_rho)`. They are mapped onto a valid
//! bivariate normal with
//!
//! - `mu = z_mu` (identity),
//! - `sigma = exp(z_sigma)` (strictly positive),
//! - `rho = tanh(z_rho)` (inside `(-1, 1)`).
//!
//! Both forms clamp `z_sigma` to `±LOG_SIGMA_LIMIT` and `rho` to `±RHO_LIMIT`
//! so saturated f32 arithmetic can never yield `sigma = 0` or `|rho| = 1`.
//!
//! Two forms exist: [`GaussianTensors`] stays on the autodiff graph and feeds
//! the loss, [`GaussianParams`] is a plain f64 value used when sampling.

use std::f64::consts::PI;

use candle_core::{Tensor, D};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{TrajError, TrajResult};
use crate::trajectory::Point;

/// Floor applied to the density before taking the log.
pub const DENSITY_EPSILON: f64 = 1e-20;

/// Largest |rho| handed out by the transform.
pub const RHO_LIMIT: f64 = 1.0 - f32::EPSILON as f64;

/// Bound on `|z_sigma|` before the exponential.
pub const LOG_SIGMA_LIMIT: f64 = 20.0;

/// Batched distribution parameters, each a `(N, 1)` column.
#[derive(Debug, Clone)]
pub struct GaussianTensors {
    pub mu_x: Tensor,
    pub mu_y: Tensor,
    pub sigma_x: Tensor,
    pub sigma_y: Tensor,
    pub rho: Tensor,
}

impl GaussianTensors {
    /// Split a `(N, 5)` raw projection output and apply the transform.
    pub fn from_raw(raw: &Tensor) -> TrajResult<Self> {
        let (_, width) = raw.dims2()?;
        if width != 5 {
            return Err(TrajError::shape_mismatch(
                "raw output width 5",
                width.to_string(),
            ));
        }
        Ok(Self {
            mu_x: raw.narrow(1, 0, 1)?,
            mu_y: raw.narrow(1, 1, 1)?,
            sigma_x: raw
                .narrow(1, 2, 1)?
                .clamp(-LOG_SIGMA_LIMIT, LOG_SIGMA_LIMIT)?
                .exp()?,
            sigma_y: raw
                .narrow(1, 3, 1)?
                .clamp(-LOG_SIGMA_LIMIT, LOG_SIGMA_LIMIT)?
                .exp()?,
            rho: raw
                .narrow(1, 4, 1)?
                .tanh()?
                .clamp(-RHO_LIMIT, RHO_LIMIT)?,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.mu_x.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `i` as scalar parameters.
    pub fn row(&self, i: usize) -> TrajResult<GaussianParams> {
        let get = |t: &Tensor| -> TrajResult<f64> {
            Ok(t.narrow(0, i, 1)?.flatten_all()?.to_vec1::<f32>()?[0] as f64)
        };
        Ok(GaussianParams::new(
            get(&self.mu_x)?,
            get(&self.mu_y)?,
            get(&self.sigma_x)?,
            get(&self.sigma_y)?,
            get(&self.rho)?,
        ))
    }
}

/// Bivariate normal density of `(x, y)` columns under `params`.
///
/// All inputs are `(N, 1)`; the result is `(N, 1)`.
pub fn bivariate_density(x: &Tensor, y: &Tensor, params: &GaussianTensors) -> TrajResult<Tensor> {
    let norm_x = x.sub(&params.mu_x)?;
    let norm_y = y.sub(&params.mu_y)?;
    let sxsy = params.sigma_x.mul(&params.sigma_y)?;

    let zx = norm_x.div(&params.sigma_x)?.sqr()?;
    let zy = norm_y.div(&params.sigma_y)?.sqr()?;
    let cross = (params.rho.mul(&norm_x.mul(&norm_y)?)?.div(&sxsy)? * 2.0)?;
    // Non-negative in exact arithmetic; rounding near |rho| = 1 can dip below.
    let z = zx.add(&zy)?.sub(&cross)?.maximum(0.0)?;

    let neg_rho = params.rho.sqr()?.affine(-1.0, 1.0)?;
    let numerator = z.neg()?.div(&(&neg_rho * 2.0)?)?.exp()?;
    let denom = (sxsy.mul(&neg_rho.sqrt()?)? * (2.0 * PI))?;

    Ok(numerator.div(&denom)?)
}

/// Summed negative log-likelihood of `target` under the raw outputs.
///
/// `raw` is `(N, 5)` and `target` is anything that flattens to `(N, 2)`.
/// Every row contributes; the result is a scalar tensor.
pub fn sequence_nll(raw: &Tensor, target: &Tensor) -> TrajResult<Tensor> {
    let params = GaussianTensors::from_raw(raw)?;
    let target = target.reshape(((), 2))?;
    if target.dims()[0] != params.len() {
        return Err(TrajError::shape_mismatch(
            format!("{} target rows", params.len()),
            target.dims()[0].to_string(),
        ));
    }

    let x = target.narrow(D::Minus1, 0, 1)?;
    let y = target.narrow(D::Minus1, 1, 1)?;
    let density = bivariate_density(&x, &y, &params)?;

    Ok(density.maximum(DENSITY_EPSILON)?.log()?.neg()?.sum_all()?)
}

/// Distribution parameters for a single step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianParams {
    pub mu_x: f64,
    pub mu_y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub rho: f64,
}

impl GaussianParams {
    pub const fn new(mu_x: f64, mu_y: f64, sigma_x: f64, sigma_y: f64, rho: f64) -> Self {
        Self {
            mu_x,
            mu_y,
            sigma_x,
            sigma_y,
            rho,
        }
    }

    /// Scalar version of the transform applied to `(z_mux, z_muy, z_sx, z_sy, z_rho)`.
    pub fn from_raw(raw: [f64; 5]) -> Self {
        let [z_mux, z_muy, z_sx, z_sy, z_rho] = raw;
        Self {
            mu_x: z_mux,
            mu_y: z_muy,
            sigma_x: z_sx.clamp(-LOG_SIGMA_LIMIT, LOG_SIGMA_LIMIT).exp(),
            sigma_y: z_sy.clamp(-LOG_SIGMA_LIMIT, LOG_SIGMA_LIMIT).exp(),
            rho: z_rho.tanh().clamp(-RHO_LIMIT, RHO_LIMIT),
        }
    }

    /// Covariance matrix `[[sx², rho·sx·sy], [rho·sx·sy, sy²]]`.
    pub fn covariance(&self) -> [[f64; 2]; 2] {
        let off = self.rho * self.sigma_x * self.sigma_y;
        [
            [self.sigma_x * self.sigma_x, off],
            [off, self.sigma_y * self.sigma_y],
        ]
    }

    /// Density at `(x, y)`.
    pub fn density(&self, x: f64, y: f64) -> f64 {
        let norm_x = x - self.mu_x;
        let norm_y = y - self.mu_y;
        let sxsy = self.sigma_x * self.sigma_y;
        let z = ((norm_x / self.sigma_x).powi(2) + (norm_y / self.sigma_y).powi(2)
            - 2.0 * self.rho * norm_x * norm_y / sxsy)
            .max(0.0);
        let neg_rho = 1.0 - self.rho * self.rho;
        (-z / (2.0 * neg_rho)).exp() / (2.0 * PI * sxsy * neg_rho.sqrt())
    }

    /// Negative log-likelihood of `(x, y)` with the epsilon floor.
    pub fn nll(&self, x: f64, y: f64) -> f64 {
        -self.density(x, y).max(DENSITY_EPSILON).ln()
    }

    /// Draw one point using the Cholesky factor of the covariance.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let n1: f64 = StandardNormal.sample(rng);
        let n2: f64 = StandardNormal.sample(rng);
        let x = self.mu_x + self.sigma_x * n1;
        let y = self.mu_y
            + self.sigma_y * (self.rho * n1 + (1.0 - self.rho * self.rho).sqrt() * n2);
        Point::new(x as f32, y as f32)
    }
}
