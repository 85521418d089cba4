//! Error types for the trajectory model.

use thiserror::Error;

/// Result type for trajectory model operations.
pub type TrajResult<T> = Result<T, TrajError>;

/// Errors that can occur while building, training or sampling the model.
#[derive(Debug, Error)]
pub enum TrajError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Batch or tensor dimensions disagree with the configuration
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Seed trajectory or batch input is unusable
    #[error("Invalid trajectory: {0}")]
    InvalidTrajectory(String),

    /// Cost or gradients left the finite range during a training step
    #[error("Non-finite value in training step {step}: {what}")]
    NonFinite { step: usize, what: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Shared variable store unusable after a panic while it was locked
    #[error("Variable store lock poisoned: {0}")]
    LockPoisoned(String),

    /// Backward pass produced no gradient for any trainable parameter
    #[error("Gradients not computed for any trainable parameter")]
    NoGradients,
}

impl TrajError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid trajectory error
    pub fn invalid_trajectory(msg: impl Into<String>) -> Self {
        Self::InvalidTrajectory(msg.into())
    }

    /// Create a poisoned variable store error
    pub fn lock_poisoned(msg: impl Into<String>) -> Self {
        Self::LockPoisoned(msg.into())
    }

    /// Create a non-finite training error
    pub fn non_finite(step: usize, what: impl Into<String>) -> Self {
        Self::NonFinite {
            step,
            what: what.into(),
        }
    }
}
