//! Error types for dualhet-nn.

use candle_core::DeviceLocation;
use thiserror::Error;

/// Model error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Graph construction or query error.
    #[error("graph error: {0}")]
    Graph(#[from] dualhet_graph::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Input tensor on a different device than the model parameters.
    #[error("device mismatch: model on {expected:?}, input on {got:?}")]
    DeviceMismatch {
        expected: DeviceLocation,
        got: DeviceLocation,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
