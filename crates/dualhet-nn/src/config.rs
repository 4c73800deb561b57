//! Model hyperparameters.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::DualHfdNet`].
///
/// Missing fields fall back to [`Default`] when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of stacked layers.
    pub n_layer: usize,
    /// Per-head width of hidden layers.
    pub intra_dim: usize,
    /// Attention heads per relation.
    pub head: usize,
    /// Number of output classes.
    pub n_class: usize,
    /// Weight of the edge-sign hinge loss.
    pub gamma1: f64,
    /// Weight of the prototype loss.
    pub gamma2: f64,
    /// Weight of the first layer's label-propagation loss. Zero leaves it out
    /// of the total.
    pub gamma3: f64,
    /// Dropout probability between and inside layers.
    pub dropout: f32,
    /// Negative slope of the attention LeakyReLU.
    pub leaky_relu_slope: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_layer: 2,
            intra_dim: 64,
            head: 2,
            n_class: 2,
            gamma1: 1.0,
            gamma2: 1.0,
            gamma3: 0.0,
            dropout: 0.0,
            leaky_relu_slope: 0.01,
        }
    }
}

impl ModelConfig {
    /// Check the configuration for values the model cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.n_layer == 0 {
            return Err(Error::InvalidConfig("n_layer must be at least 1".into()));
        }
        if self.intra_dim == 0 || self.head == 0 {
            return Err(Error::InvalidConfig(format!(
                "intra_dim ({}) and head ({}) must be positive",
                self.intra_dim, self.head
            )));
        }
        if self.n_class < 2 {
            return Err(Error::InvalidConfig(format!(
                "n_class must be at least 2, got {}",
                self.n_class
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        for (name, gamma) in [("gamma1", self.gamma1), ("gamma2", self.gamma2), ("gamma3", self.gamma3)] {
            if gamma < 0.0 || !gamma.is_finite() {
                return Err(Error::InvalidConfig(format!("{name} must be finite and non-negative, got {gamma}")));
            }
        }
        Ok(())
    }
}
