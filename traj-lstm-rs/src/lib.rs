//! Probabilistic trajectory prediction with an LSTM and a bivariate Gaussian head.
//!
//! This crate models 2-D pedestrian trajectories as sequences of points:
//! - Single-layer LSTM advanced one timestep at a time with explicit state
//! - Linear projection to the five parameters of a bivariate Gaussian
//! - Negative log-likelihood loss averaged over batch and timesteps
//! - Adam updates with gradient clipping by global norm
//! - Autoregressive sampling seeded by an observed trajectory
//!
//! # Example
//!
//! ```no_run
//! use candle_core::Device;
//! use traj_lstm_rs::{Point, Sampler, TrajBatch, TrajConfig, TrajTrainer};
//!
//! let config = TrajConfig::default().with_batch(1, 4);
//! let device = Device::Cpu;
//! let mut trainer = TrajTrainer::from_config(&config, &device).unwrap();
//!
//! let walk: Vec<Point> = (0..5).map(|i| Point::new(i as f32, 0.5 * i as f32)).collect();
//! let batch = TrajBatch::next_step(&[walk.clone()], 4, &device).unwrap();
//! let outcome = trainer.train_step(&batch).unwrap();
//! println!("cost {:.4}", outcome.cost);
//!
//! let model = trainer.into_model();
//! let predicted = Sampler::new(&model, 0).sample(&walk[..3], 8).unwrap();
//! assert_eq!(predicted.len(), 11);
//! ```
//!
//! # Inference
//!
//! Sampling always runs with batch size 1 and one timestep per call, whatever
//! geometry the model was trained with. Load trained weights under an
//! inference configuration:
//!
//! ```no_run
//! use std::path::Path;
//! use candle_core::Device;
//! use traj_lstm_rs::{TrajConfig, TrajModel};
//!
//! let config = TrajConfig::load_json(Path::new("run/config.json")).unwrap();
//! let weights = Path::new("run/model.safetensors");
//! let model = TrajModel::load(&config.inference(), weights, &Device::Cpu).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod gaussian;
pub mod model;
pub mod params;
pub mod recurrent;
pub mod sampler;
pub mod trainer;
pub mod trajectory;

pub use config::TrajConfig;
pub use error::{TrajError, TrajResult};
pub use gaussian::{bivariate_density, sequence_nll, GaussianParams, GaussianTensors};
pub use model::TrajModel;
pub use params::ParameterSet;
pub use recurrent::{InputStage, LstmState, RawCoordinates, RecurrentCore};
pub use sampler::{sample_with_rng, Sampler};
pub use trainer::{
    clip_by_global_norm, global_norm, StepOutcome, TrainableModel, TrajOptimizer, TrajTrainer,
};
pub use trajectory::{Point, TrajBatch, Trajectory};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::TrajConfig;
    pub use crate::error::{TrajError, TrajResult};
    pub use crate::gaussian::GaussianParams;
    pub use crate::model::TrajModel;
    pub use crate::sampler::Sampler;
    pub use crate::trainer::{StepOutcome, TrainableModel, TrajOptimizer, TrajTrainer};
    pub use crate::trajectory::{Point, TrajBatch, Trajectory};
}
