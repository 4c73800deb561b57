//! Edge heterophily scoring.
//!
//! Scores an edge by how similar its endpoints look after a shared
//! projection:
//!
//! ```text
//! s_uv = tanh(W_f · dropout([W_d x_u ‖ W_d x_v ‖ W_d x_u - W_d x_v]))
//! ```
//!
//! Scores near +1 mark homophilic edges (same class), near -1 heterophilic
//! ones. Aggregators multiply neighbor messages by this sign, and the
//! layer loss supervises it with a hinge loss on labeled `homo` edges.

use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

/// Pairwise sign scorer shared by every aggregator of a layer.
pub struct HeterophilyLearning {
    project: Linear,
    score: Linear,
    dropout: Dropout,
}

impl HeterophilyLearning {
    /// Create a scorer projecting `input_dim` features to `hidden_dim`.
    pub fn new(input_dim: usize, hidden_dim: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            project: linear(input_dim, hidden_dim, vb.pp("project"))?,
            score: linear(3 * hidden_dim, 1, vb.pp("score"))?,
            dropout: Dropout::new(dropout),
        })
    }

    /// Score each (src, dst) row pair.
    ///
    /// # Arguments
    /// - `src`: Source features (E x input_dim)
    /// - `dst`: Destination features (E x input_dim)
    ///
    /// # Returns
    /// - Scores in (-1, 1), shape (E,)
    pub fn forward_t(&self, src: &Tensor, dst: &Tensor, train: bool) -> Result<Tensor> {
        let src = self.project.forward(src)?;
        let dst = self.project.forward(dst)?;
        let diff = (&src - &dst)?;
        let feats = Tensor::cat(&[&src, &dst, &diff], 1)?;
        let feats = self.dropout.forward(&feats, train)?;
        Ok(self.score.forward(&feats)?.squeeze(1)?.tanh()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_score_shape_and_range() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let scorer = HeterophilyLearning::new(8, 16, 0.0, vb).unwrap();

        // Large inputs push the pre-activation far from zero.
        let src = (Tensor::randn(0f32, 1f32, (32, 8), &device).unwrap() * 50.0).unwrap();
        let dst = Tensor::randn(0f32, 1f32, (32, 8), &device).unwrap();

        let s = scorer.forward_t(&src, &dst, false).unwrap();
        assert_eq!(s.dims(), &[32]);
        for v in s.to_vec1::<f32>().unwrap() {
            assert!(v.is_finite() && (-1.0..=1.0).contains(&v), "score {v} out of range");
        }
    }

    #[test]
    fn test_single_edge_keeps_rank_one() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let scorer = HeterophilyLearning::new(4, 4, 0.0, vb).unwrap();

        let x = Tensor::zeros((1, 4), DType::F32, &device).unwrap();
        let s = scorer.forward_t(&x, &x, false).unwrap();
        assert_eq!(s.dims(), &[1]);
        let v = s.to_vec1::<f32>().unwrap()[0];
        assert!(v > -1.0 && v < 1.0);
    }
}
