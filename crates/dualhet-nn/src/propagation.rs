//! Label propagation over a masked two-hop adjacency.
//!
//! ```text
//! T     = A² ⊙ M                  (M learned, initialised to A)
//! T̂_i  = T_i / max(‖T_i‖₁, ε)
//! Ŷ     = T̂ · Y
//! ```
//!
//! `Y` is the one-hot label matrix of training nodes. A node whose masked
//! row is empty gets an all-zero distribution rather than NaN.

use crate::error::Result;
use candle_core::{DType, Tensor};
use candle_nn::{Init, VarBuilder};

const L1_EPS: f64 = 1e-12;

/// Label propagation for one relation.
pub struct LabelPropagation {
    /// Fixed one-hop adjacency `A`, the mask's starting value.
    adjacency: Tensor,
    /// Fixed two-hop adjacency `A²`.
    two_hop: Tensor,
    /// Learned offset so that the mask is `A + mask_delta`.
    mask_delta: Tensor,
    /// Learned scalar gate on the mask, initialised in [0.5, 1).
    gate: Tensor,
}

/// Output of [`LabelPropagation::forward`].
#[derive(Debug, Clone)]
pub struct PropagationOutput {
    /// Row-normalised propagation matrix `(N, N)`.
    pub transition: Tensor,
    /// Propagated label distribution `(N, n_class)`.
    pub label_dist: Tensor,
}

impl PropagationOutput {
    /// Nonzero entries of the propagation matrix as `(row, col, weight)`.
    pub fn edge_weights(&self) -> Result<Vec<(usize, usize, f32)>> {
        let rows = self.transition.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        Ok(rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, &w)| w != 0.0)
                    .map(move |(j, &w)| (i, j, w))
            })
            .collect())
    }
}

impl LabelPropagation {
    /// Create from a relation's one-hop and two-hop adjacency, both `(N, N)`.
    pub fn new(adjacency: Tensor, two_hop: Tensor, vb: VarBuilder) -> Result<Self> {
        let n = adjacency.dim(0)?;
        let mask_delta = vb.get_with_hints((n, n), "mask_delta", Init::Const(0.0))?;
        let gate = vb.get_with_hints(1, "gate", Init::Uniform { lo: 0.5, up: 1.0 })?;
        Ok(Self {
            adjacency,
            two_hop,
            mask_delta,
            gate,
        })
    }

    /// Current adjacency mask `A + delta`.
    pub fn mask(&self) -> Result<Tensor> {
        Ok((&self.adjacency + &self.mask_delta)?)
    }

    /// The learned scalar gate of this relation.
    pub fn gate(&self) -> &Tensor {
        &self.gate
    }

    /// Propagate `labels` `(N, n_class)` along the masked two-hop structure.
    pub fn forward(&self, labels: &Tensor) -> Result<PropagationOutput> {
        let t = (&self.two_hop * self.mask()?)?;
        let norm = t.abs()?.sum_keepdim(1)?.maximum(L1_EPS)?;
        let transition = t.broadcast_div(&norm)?;
        let label_dist = transition.matmul(labels)?;
        Ok(PropagationOutput {
            transition,
            label_dist,
        })
    }
}
