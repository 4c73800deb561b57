//! Loss terms shared by the layers and the model.

use crate::error::Result;
use candle_core::{Tensor, D};

/// Offset added to differences before taking the norm, as in pairwise
/// distance implementations, so identical rows keep a finite gradient.
pub const PAIRWISE_EPS: f64 = 1e-6;

/// Hinge loss `mean(max(0, 1 - y · s))` for labels `y` in {-1, +1}.
pub fn hinge_loss(labels: &Tensor, scores: &Tensor) -> Result<Tensor> {
    let margin = (labels * scores)?.affine(-1.0, 1.0)?;
    Ok(margin.relu()?.mean_all()?)
}

/// Row-wise Euclidean distance `‖a_i - b_i + eps‖₂`, shape `(N,)`.
///
/// `b` may be a single row `(1, D)` broadcast against `a`.
pub fn pairwise_distance(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let diff = (a.broadcast_sub(b)? + PAIRWISE_EPS)?;
    Ok(diff.sqr()?.sum(D::Minus1)?.sqrt()?)
}

/// Negative log-likelihood over raw (non-log) class scores.
///
/// `-mean_i(probs[i, target_i])`; zero rows contribute zero rather than
/// NaN, unlike a log-probability NLL.
pub fn nll(probs: &Tensor, target: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::loss::nll(probs, target)?)
}

/// Cross-entropy of logits `(N, C)` against class indices `(N,)`.
pub fn cross_entropy(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::loss::cross_entropy(logits, target)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_hinge_loss() {
        let device = Device::Cpu;
        let labels = Tensor::new(&[1f32, -1.0, 1.0, -1.0], &device).unwrap();
        let scores = Tensor::new(&[1f32, -1.0, 0.0, 0.5], &device).unwrap();
        // margins: 0, 0, 1, 1.5
        assert!((scalar(&hinge_loss(&labels, &scores).unwrap()) - 0.625).abs() < 1e-6);
    }

    #[test]
    fn test_pairwise_distance_broadcasts_prototype() {
        let device = Device::Cpu;
        let a = Tensor::new(&[[3f32, 4.0], [0.0, 0.0]], &device).unwrap();
        let p = Tensor::new(&[[0f32, 0.0]], &device).unwrap();
        let d = pairwise_distance(&a, &p).unwrap().to_vec1::<f32>().unwrap();
        assert!((d[0] - 5.0).abs() < 1e-4);
        // Identical rows: eps * sqrt(2), not zero.
        assert!(d[1] > 0.0 && d[1] < 1e-5);
    }

    #[test]
    fn test_nll_on_probabilities() {
        let device = Device::Cpu;
        let probs = Tensor::new(&[[0.25f32, 0.75], [0.0, 0.0]], &device).unwrap();
        let target = Tensor::new(&[1u32, 0], &device).unwrap();
        assert!((scalar(&nll(&probs, &target).unwrap()) + 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((3, 2), candle_core::DType::F32, &device).unwrap();
        let target = Tensor::new(&[0u32, 1, 1], &device).unwrap();
        let ce = scalar(&cross_entropy(&logits, &target).unwrap());
        assert!((ce - std::f32::consts::LN_2).abs() < 1e-5);
    }
}
