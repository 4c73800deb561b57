//! One multi-relation layer: per-relation aggregation, fusion, auxiliary losses.

use crate::aggregation::Aggregation;
use crate::error::Result;
use crate::heterophily::HeterophilyLearning;
use crate::loss::{cross_entropy, hinge_loss, nll, pairwise_distance};
use crate::tensors::{index_tensor, square_matrix, EdgeIndex};
use candle_core::{Device, Tensor};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};
use dualhet_graph::{balanced_indices, FraudGraph, HOMO_RELATION};
use rand::Rng;
use tracing::{debug, trace};

/// Shape parameters of a [`MultiRelationLayer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSpec {
    /// Input feature width.
    pub input_dim: usize,
    /// Output width per head.
    pub output_dim: usize,
    /// Attention heads.
    pub head: usize,
    /// Sum heads instead of concatenating.
    pub if_sum: bool,
    /// Dropout probability.
    pub dropout: f32,
    /// LeakyReLU slope of the attention logits.
    pub negative_slope: f64,
}

impl LayerSpec {
    /// Width of the layer output.
    pub fn width(&self) -> usize {
        if self.if_sum {
            self.output_dim
        } else {
            self.output_dim * self.head
        }
    }
}

/// Output of [`MultiRelationLayer::forward_t`].
#[derive(Debug, Clone)]
pub struct LayerOutput {
    /// Fused node features `(N, width)`.
    pub h: Tensor,
    /// Label distribution from the last relation's propagation `(N, n_class)`.
    pub label_dist: Tensor,
}

/// Output of [`MultiRelationLayer::loss`].
#[derive(Debug, Clone)]
pub struct LayerLoss {
    /// Fused node features `(N, width)`.
    pub h: Tensor,
    /// Hinge loss of the heterophily scores on `homo` edges.
    pub edge: Tensor,
    /// Cross-entropy of negative distances to the class prototypes.
    pub prototype: Tensor,
    /// NLL of the propagated label distribution.
    pub propagation: Tensor,
}

/// Runs one [`Aggregation`] per relation (all but `homo`), concatenates
/// their outputs and projects back to the layer width.
pub struct MultiRelationLayer {
    aggregators: Vec<Aggregation>,
    scorer: HeterophilyLearning,
    project: Linear,
    dropout: Dropout,
    spec: LayerSpec,
}

impl MultiRelationLayer {
    /// Build a layer for `graph`'s relations.
    ///
    /// Dense one-hop and two-hop adjacency of each relation are materialised
    /// here and stay fixed for the lifetime of the layer.
    pub fn new(graph: &FraudGraph, spec: LayerSpec, vb: VarBuilder) -> Result<Self> {
        let n = graph.num_nodes();
        let device = vb.device().clone();
        let scorer = HeterophilyLearning::new(
            spec.input_dim,
            spec.output_dim * spec.head,
            spec.dropout,
            vb.pp("heterophily"),
        )?;

        let relations = graph.aggregation_relations();
        let mut aggregators = Vec::with_capacity(relations.len());
        for relation in &relations {
            let adjacency = square_matrix(graph.dense_adjacency(relation)?, n, &device)?;
            let two_hop = square_matrix(graph.two_hop_adjacency(relation)?, n, &device)?;
            aggregators.push(Aggregation::new(
                *relation,
                spec.input_dim,
                spec.output_dim,
                spec.head,
                spec.if_sum,
                spec.negative_slope,
                adjacency,
                two_hop,
                vb.pp(format!("rel_{relation}")),
            )?);
        }

        let width = spec.width();
        let project = linear(relations.len() * width, width, vb.pp("project"))?;
        debug!(?relations, input_dim = spec.input_dim, width, head = spec.head, "built layer");

        Ok(Self {
            aggregators,
            scorer,
            project,
            dropout: Dropout::new(spec.dropout),
            spec,
        })
    }

    /// Width of the layer output.
    pub fn output_dim(&self) -> usize {
        self.spec.width()
    }

    /// Relations this layer aggregates over, in order.
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.aggregators.iter().map(Aggregation::relation)
    }

    /// Per-relation aggregators.
    pub fn aggregators(&self) -> &[Aggregation] {
        &self.aggregators
    }

    /// The heterophily scorer shared by every aggregator.
    pub fn scorer(&self) -> &HeterophilyLearning {
        &self.scorer
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `graph`: Graph supplying the relation edges
    /// - `x`: Node features (N x input_dim)
    /// - `label_matrix`: One-hot training labels (N x n_class)
    /// - `train`: Enable dropout
    pub fn forward_t(
        &self,
        graph: &FraudGraph,
        x: &Tensor,
        label_matrix: &Tensor,
        train: bool,
    ) -> Result<LayerOutput> {
        let device = x.device();
        let mut hs = Vec::with_capacity(self.aggregators.len());
        let mut label_dist = None;
        for agg in &self.aggregators {
            let edges = EdgeIndex::from_store(graph.edges(agg.relation())?, device)?;
            let out = agg.forward_t(x, &edges, label_matrix, &self.scorer, train)?;
            hs.push(out.h);
            label_dist = Some(out.propagation.label_dist);
        }
        let label_dist = match label_dist {
            Some(dist) => dist,
            None => return Err(dualhet_graph::Error::NoAggregationRelations.into()),
        };

        let h = Tensor::cat(&hs, 1)?;
        let h = self.dropout.forward(&h, train)?;
        let h = self.project.forward(&h)?;
        Ok(LayerOutput { h, label_dist })
    }

    /// Forward pass plus the layer's auxiliary losses.
    ///
    /// Edge and node subsamples are class-balanced draws from `rng`:
    /// training `homo` edges labeled `+1` against `-1`, and training nodes
    /// labeled 1 against 0.
    pub fn loss<R: Rng>(
        &self,
        graph: &FraudGraph,
        x: &Tensor,
        targets: &Tensor,
        label_matrix: &Tensor,
        rng: &mut R,
        train: bool,
    ) -> Result<LayerLoss> {
        let device = x.device();
        let out = self.forward_t(graph, x, label_matrix, train)?;

        let edge = self.edge_sign_loss(graph, x, device, rng, train)?;

        let pos_nodes = graph.train_nodes_with_label(1);
        let neg_nodes = graph.train_nodes_with_label(0);
        let node_index = balanced_indices(&pos_nodes, &neg_nodes, "training nodes", rng)?;
        trace!(nodes = node_index.len(), "layer loss node sample");

        let pos_proto = out
            .h
            .index_select(&index_tensor(&pos_nodes, device)?, 0)?
            .mean_keepdim(0)?;
        let neg_proto = out
            .h
            .index_select(&index_tensor(&neg_nodes, device)?, 0)?
            .mean_keepdim(0)?;

        let idx = index_tensor(&node_index, device)?;
        let h_sel = out.h.index_select(&idx, 0)?;
        let target = targets.index_select(&idx, 0)?;

        // Column 0 is the negative class, column 1 the positive.
        let logits = Tensor::cat(
            &[
                pairwise_distance(&h_sel, &neg_proto)?.neg()?.unsqueeze(1)?,
                pairwise_distance(&h_sel, &pos_proto)?.neg()?.unsqueeze(1)?,
            ],
            1,
        )?;
        let prototype = cross_entropy(&logits, &target)?;
        let propagation = nll(&out.label_dist.index_select(&idx, 0)?, &target)?;

        Ok(LayerLoss {
            h: out.h,
            edge,
            prototype,
            propagation,
        })
    }

    /// Hinge loss of heterophily scores on a balanced sample of `homo` edges.
    fn edge_sign_loss<R: Rng>(
        &self,
        graph: &FraudGraph,
        x: &Tensor,
        device: &Device,
        rng: &mut R,
        train: bool,
    ) -> Result<Tensor> {
        let pos = graph.homo_train_edges_with_sign(1);
        let neg = graph.homo_train_edges_with_sign(-1);
        let edge_index = balanced_indices(&pos, &neg, "homo edges", rng)?;
        trace!(edges = edge_index.len(), "layer loss edge sample");

        let edges = EdgeIndex::select(graph.edges(HOMO_RELATION)?, &edge_index, device)?;
        let scores = self.scorer.forward_t(
            &x.index_select(&edges.src, 0)?,
            &x.index_select(&edges.dst, 0)?,
            train,
        )?;
        let signs: Vec<f32> = edge_index
            .iter()
            .map(|&e| f32::from(graph.homo_signs().labels[e]))
            .collect();
        let signs = Tensor::from_vec(signs, edge_index.len(), device)?.to_dtype(x.dtype())?;
        hinge_loss(&signs, &scores)
    }
}
