//! Sign-aware attention aggregation over one relation.
//!
//! For every edge (u -> v) of the relation:
//!
//! ```text
//! m_uv     = s_uv · W h_u                      (s_uv from HeterophilyLearning)
//! e_uv     = LeakyReLU(a^T [m_uv ‖ W h_v])     (per head)
//! alpha_uv = softmax_{u in N(v)}(e_uv)
//! h_v'     = Σ_u alpha_uv m_uv
//! ```
//!
//! The sign lets heterophilic neighbors push a node's representation away
//! from theirs instead of smoothing towards it. Heads are summed or
//! concatenated. Scatter-add does the neighborhood reduction, so a node with
//! no incoming edge of the relation ends up with a zero vector.

use crate::error::Result;
use crate::heterophily::HeterophilyLearning;
use crate::propagation::{LabelPropagation, PropagationOutput};
use crate::tensors::{segment_max, EdgeIndex};
use candle_core::Tensor;
use candle_nn::{linear, ops, Linear, Module, VarBuilder};
use tracing::trace;

/// Attention aggregator for a single relation.
pub struct Aggregation {
    relation: String,
    head: usize,
    out_dim: usize,
    if_sum: bool,
    negative_slope: f64,
    project: Linear,
    attention: Linear,
    propagation: LabelPropagation,
}

/// Output of [`Aggregation::forward_t`].
#[derive(Debug, Clone)]
pub struct AggregationOutput {
    /// Aggregated node features, `(N, out_dim)` or `(N, head * out_dim)`.
    pub h: Tensor,
    /// Label propagation over this relation's structure.
    pub propagation: PropagationOutput,
}

impl Aggregation {
    /// Create an aggregator.
    ///
    /// # Arguments
    /// - `relation`: Relation name (for logging)
    /// - `input_dim`: Input feature dimension
    /// - `out_dim`: Output dimension per head
    /// - `head`: Number of attention heads
    /// - `if_sum`: Sum heads instead of concatenating them
    /// - `negative_slope`: LeakyReLU slope for attention logits
    /// - `adjacency`, `two_hop`: The relation's `(N, N)` structure
    /// - `vb`: Variable builder
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relation: impl Into<String>,
        input_dim: usize,
        out_dim: usize,
        head: usize,
        if_sum: bool,
        negative_slope: f64,
        adjacency: Tensor,
        two_hop: Tensor,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            relation: relation.into(),
            head,
            out_dim,
            if_sum,
            negative_slope,
            project: linear(input_dim, out_dim * head, vb.pp("project"))?,
            attention: linear(2 * out_dim, 1, vb.pp("attention"))?,
            propagation: LabelPropagation::new(adjacency, two_hop, vb.pp("propagation"))?,
        })
    }

    /// Relation this aggregator runs over.
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Width of the aggregated features.
    pub fn output_dim(&self) -> usize {
        if self.if_sum {
            self.out_dim
        } else {
            self.out_dim * self.head
        }
    }

    /// Label propagation of this relation.
    pub fn propagation(&self) -> &LabelPropagation {
        &self.propagation
    }

    /// Signed messages `(E, head, out_dim)` and raw attention logits `(E, head)`.
    fn edge_logits(
        &self,
        x: &Tensor,
        edges: &EdgeIndex,
        scorer: &HeterophilyLearning,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let e = edges.num_edges();
        let sign = scorer.forward_t(
            &x.index_select(&edges.src, 0)?,
            &x.index_select(&edges.dst, 0)?,
            train,
        )?;

        let h = self.project.forward(x)?;
        let msg = h
            .index_select(&edges.src, 0)?
            .broadcast_mul(&sign.unsqueeze(1)?)?
            .reshape((e, self.head, self.out_dim))?;
        let h_dst = h
            .index_select(&edges.dst, 0)?
            .reshape((e, self.head, self.out_dim))?;

        let z = Tensor::cat(&[&msg, &h_dst], 2)?;
        let logits = ops::leaky_relu(&self.attention.forward(&z)?, self.negative_slope)?;
        Ok((msg, logits.squeeze(2)?))
    }

    /// Softmax of `logits` over each destination's incoming edges.
    fn normalize(&self, logits: &Tensor, edges: &EdgeIndex, num_nodes: usize) -> Result<Tensor> {
        let shift = segment_max(logits, &edges.dst_nodes)?;
        let exp = (logits - shift)?.exp()?;
        let denom = Tensor::zeros((num_nodes, self.head), exp.dtype(), exp.device())?
            .index_add(&edges.dst, &exp, 0)?;
        Ok((exp / denom.index_select(&edges.dst, 0)?)?)
    }

    /// Normalised attention weight of every edge per head, `(E, head)`.
    pub fn attention(
        &self,
        x: &Tensor,
        edges: &EdgeIndex,
        scorer: &HeterophilyLearning,
        train: bool,
    ) -> Result<Tensor> {
        if edges.num_edges() == 0 {
            return Ok(Tensor::zeros((0, self.head), x.dtype(), x.device())?);
        }
        let (_, logits) = self.edge_logits(x, edges, scorer, train)?;
        self.normalize(&logits, edges, x.dim(0)?)
    }

    /// Aggregate `x` `(N, input_dim)` over the relation and propagate `labels`.
    pub fn forward_t(
        &self,
        x: &Tensor,
        edges: &EdgeIndex,
        labels: &Tensor,
        scorer: &HeterophilyLearning,
        train: bool,
    ) -> Result<AggregationOutput> {
        let n = x.dim(0)?;
        let propagation = self.propagation.forward(labels)?;
        trace!(relation = %self.relation, edges = edges.num_edges(), "aggregate");

        if edges.num_edges() == 0 {
            let h = Tensor::zeros((n, self.output_dim()), x.dtype(), x.device())?;
            return Ok(AggregationOutput { h, propagation });
        }

        let (msg, logits) = self.edge_logits(x, edges, scorer, train)?;
        let alpha = self.normalize(&logits, edges, n)?;
        let weighted = msg.broadcast_mul(&alpha.unsqueeze(2)?)?;
        let out = Tensor::zeros((n, self.head, self.out_dim), x.dtype(), x.device())?
            .index_add(&edges.dst, &weighted, 0)?;

        let h = if self.if_sum {
            out.sum(1)?
        } else {
            out.reshape((n, self.head * self.out_dim))?
        };
        Ok(AggregationOutput { h, propagation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::{label_matrix, node_features, square_matrix};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use dualhet_graph::{EdgeStore, FraudGraph, FraudGraphBuilder};

    /// Star into node 1 plus one edge back to 0; nodes 2 and 3 receive nothing.
    fn star_graph() -> FraudGraph {
        let features = (0..4 * 3).map(|v| (v as f32 * 0.37).sin()).collect();
        FraudGraphBuilder::new(4, 3)
            .features(features)
            .labels(vec![0, 1, 0, 1])
            .train_mask(vec![true; 4])
            .relation("r", EdgeStore::from_edges(vec![0, 2, 3, 1], vec![1, 1, 1, 0]))
            .homo_from_relations()
            .build()
            .unwrap()
    }

    fn build(
        graph: &FraudGraph,
        head: usize,
        if_sum: bool,
        vb: VarBuilder,
    ) -> (Aggregation, HeterophilyLearning) {
        let device = Device::Cpu;
        let n = graph.num_nodes();
        let adj = square_matrix(graph.dense_adjacency("r").unwrap(), n, &device).unwrap();
        let a2 = square_matrix(graph.two_hop_adjacency("r").unwrap(), n, &device).unwrap();
        let scorer = HeterophilyLearning::new(3, 5 * head, 0.0, vb.pp("scorer")).unwrap();
        let agg = Aggregation::new("r", 3, 5, head, if_sum, 0.01, adj, a2, vb.pp("agg")).unwrap();
        (agg, scorer)
    }

    fn var_rows(varmap: &VarMap, name: &str) -> Vec<Vec<f32>> {
        let data = varmap.data().lock().unwrap();
        data[name].as_tensor().to_vec2::<f32>().unwrap()
    }

    fn var_vec(varmap: &VarMap, name: &str) -> Vec<f32> {
        let data = varmap.data().lock().unwrap();
        data[name].as_tensor().to_vec1::<f32>().unwrap()
    }

    /// Aggregation recomputed with plain loops from the stored `agg.*` weights.
    fn reference_output(
        varmap: &VarMap,
        x: &[Vec<f32>],
        edges: &[(usize, usize)],
        sign: &[f32],
        head: usize,
        out_dim: usize,
    ) -> Vec<Vec<f32>> {
        let w = var_rows(varmap, "agg.project.weight");
        let b = var_vec(varmap, "agg.project.bias");
        let a = var_rows(varmap, "agg.attention.weight").remove(0);
        let c = var_vec(varmap, "agg.attention.bias")[0];
        fn dot(p: &[f32], q: &[f32]) -> f32 {
            p.iter().zip(q).map(|(u, v)| u * v).sum()
        }

        let h: Vec<Vec<f32>> = x
            .iter()
            .map(|row| w.iter().zip(&b).map(|(wr, bi)| dot(wr, row) + bi).collect())
            .collect();
        let n = x.len();
        let mut out = vec![vec![0.0f32; head * out_dim]; n];
        for k in 0..head {
            let span = k * out_dim..(k + 1) * out_dim;
            let msgs: Vec<Vec<f32>> = edges
                .iter()
                .zip(sign)
                .map(|(&(src, _), &g)| h[src][span.clone()].iter().map(|v| g * v).collect())
                .collect();
            let logits: Vec<f32> = edges
                .iter()
                .zip(&msgs)
                .map(|(&(_, dst), m)| {
                    let z: Vec<f32> = m.iter().chain(&h[dst][span.clone()]).copied().collect();
                    let e = dot(&a, &z) + c;
                    if e >= 0.0 {
                        e
                    } else {
                        0.01 * e
                    }
                })
                .collect();
            for v in 0..n {
                let incoming: Vec<usize> = (0..edges.len()).filter(|&e| edges[e].1 == v).collect();
                let max = incoming
                    .iter()
                    .map(|&e| logits[e])
                    .fold(f32::NEG_INFINITY, f32::max);
                let denom: f32 = incoming.iter().map(|&e| (logits[e] - max).exp()).sum();
                for &e in &incoming {
                    let alpha = (logits[e] - max).exp() / denom;
                    for (j, m) in msgs[e].iter().enumerate() {
                        out[v][k * out_dim + j] += alpha * m;
                    }
                }
            }
        }
        out
    }

    fn assert_close(got: &[Vec<f32>], expected: &[Vec<f32>]) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().flatten().zip(expected.iter().flatten()) {
            assert!((g - e).abs() < 1e-4, "got {got:?}, expected {expected:?}");
        }
    }

    #[test]
    fn test_forward_matches_reference_computation() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let graph = star_graph();
        // Same variable names: both aggregators share one set of weights.
        let (concat, scorer) = build(&graph, 2, false, vb.clone());
        let (summed, _) = build(&graph, 2, true, vb);

        let x = node_features(&graph, &device).unwrap();
        let rows = x.to_vec2::<f32>().unwrap();
        let edges = EdgeIndex::from_store(graph.edges("r").unwrap(), &device).unwrap();
        let pairs: Vec<(usize, usize)> = graph.edges("r").unwrap().iter().collect();
        let labels = label_matrix(&graph, 2, &device).unwrap();
        let signs = |scorer: &HeterophilyLearning| {
            let src = x.index_select(&edges.src, 0).unwrap();
            let dst = x.index_select(&edges.dst, 0).unwrap();
            scorer.forward_t(&src, &dst, false).unwrap().to_vec1::<f32>().unwrap()
        };
        let forward = |agg: &Aggregation| {
            agg.forward_t(&x, &edges, &labels, &scorer, false)
                .unwrap()
                .h
                .to_vec2::<f32>()
                .unwrap()
        };

        let sign = signs(&scorer);
        let expected = reference_output(&varmap, &rows, &pairs, &sign, 2, 5);
        let h = forward(&concat);
        assert_close(&h, &expected);

        let expected_sum: Vec<Vec<f32>> = expected
            .iter()
            .map(|r| (0..5).map(|j| r[j] + r[5 + j]).collect())
            .collect();
        assert_close(&forward(&summed), &expected_sum);

        // Negating the scorer's output layer flips the sign of every edge.
        {
            let data = varmap.data().lock().unwrap();
            for name in ["scorer.score.weight", "scorer.score.bias"] {
                let var = &data[name];
                var.set(&var.as_tensor().neg().unwrap()).unwrap();
            }
        }
        let flipped = signs(&scorer);
        for (s, f) in sign.iter().zip(&flipped) {
            assert!((s + f).abs() < 1e-6);
        }
        let h_flipped = forward(&concat);
        assert_close(&h_flipped, &reference_output(&varmap, &rows, &pairs, &flipped, 2, 5));
        assert!(h
            .iter()
            .flatten()
            .zip(h_flipped.iter().flatten())
            .any(|(a, b)| (a - b).abs() > 1e-4));
    }

    #[test]
    fn test_attention_sums_to_one_per_destination() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let graph = star_graph();
        let (agg, scorer) = build(&graph, 3, false, vb);

        let x = node_features(&graph, &device).unwrap();
        let edges = EdgeIndex::from_store(graph.edges("r").unwrap(), &device).unwrap();
        let alpha = agg.attention(&x, &edges, &scorer, false).unwrap();
        assert_eq!(alpha.dims(), &[4, 3]);

        let alpha = alpha.to_vec2::<f32>().unwrap();
        let mut sums = [[0.0f32; 3]; 4];
        for (row, &d) in alpha.iter().zip(&edges.dst_nodes) {
            for (h, &a) in row.iter().enumerate() {
                assert!(a >= 0.0);
                sums[d as usize][h] += a;
            }
        }
        for node in [0, 1] {
            for h in 0..3 {
                assert!((sums[node][h] - 1.0).abs() < 1e-5, "node {node} head {h}: {}", sums[node][h]);
            }
        }
    }

    #[test]
    fn test_isolated_destinations_get_zero() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let graph = star_graph();
        let (agg, scorer) = build(&graph, 2, false, vb);

        let x = node_features(&graph, &device).unwrap();
        let edges = EdgeIndex::from_store(graph.edges("r").unwrap(), &device).unwrap();
        let labels = label_matrix(&graph, 2, &device).unwrap();
        let out = agg.forward_t(&x, &edges, &labels, &scorer, false).unwrap();

        assert_eq!(out.h.dims(), &[4, 10]);
        let h = out.h.to_vec2::<f32>().unwrap();
        for node in [2, 3] {
            assert!(h[node].iter().all(|&v| v == 0.0));
        }
        assert!(h.iter().flatten().all(|v| v.is_finite()));
        assert_eq!(out.propagation.label_dist.dims(), &[4, 2]);
    }

    #[test]
    fn test_sum_heads_width() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let graph = star_graph();
        let (agg, scorer) = build(&graph, 4, true, vb);
        assert_eq!(agg.output_dim(), 5);

        let x = node_features(&graph, &device).unwrap();
        let edges = EdgeIndex::from_store(graph.edges("r").unwrap(), &device).unwrap();
        let labels = label_matrix(&graph, 2, &device).unwrap();
        let out = agg.forward_t(&x, &edges, &labels, &scorer, false).unwrap();
        assert_eq!(out.h.dims(), &[4, 5]);
    }

    #[test]
    fn test_large_logits_stay_finite() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let graph = star_graph();
        let (agg, scorer) = build(&graph, 1, true, vb);

        let x = (node_features(&graph, &device).unwrap() * 1e4).unwrap();
        let edges = EdgeIndex::from_store(graph.edges("r").unwrap(), &device).unwrap();
        let alpha = agg.attention(&x, &edges, &scorer, false).unwrap();
        assert!(alpha
            .to_vec2::<f32>()
            .unwrap()
            .iter()
            .flatten()
            .all(|a| a.is_finite()));
    }
}
