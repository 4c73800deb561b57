//! The stacked model: layers, forward pass and the combined training loss.

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::layer::{LayerSpec, MultiRelationLayer};
use crate::loss::cross_entropy;
use crate::tensors::{index_tensor, label_matrix, node_features};
use candle_core::{Device, Tensor};
use candle_nn::{Dropout, VarBuilder};
use dualhet_graph::{balanced_indices, FraudGraph};
use rand::Rng;
use tracing::debug;

/// Loss terms of one [`DualHfdNet::loss`] call.
#[derive(Debug, Clone)]
pub struct ModelLoss {
    /// `classification + gamma1*edge + gamma2*prototype + gamma3*propagation`.
    pub total: Tensor,
    /// Balanced cross-entropy of the final layer output.
    pub classification: Tensor,
    /// Edge-sign hinge loss summed over layers.
    pub edge: Tensor,
    /// Prototype loss summed over layers.
    pub prototype: Tensor,
    /// Label-propagation NLL of the first layer.
    pub propagation: Tensor,
}

/// Heterophily-aware multi-relation GNN with a label-propagation signal.
///
/// Layers are separated by ReLU and dropout. The last layer sums its heads
/// and emits `n_class` logits per node.
pub struct DualHfdNet {
    layers: Vec<MultiRelationLayer>,
    dropout: Dropout,
    config: ModelConfig,
    input_dim: usize,
    device: Device,
}

impl DualHfdNet {
    /// Build the model for `graph`'s relations and feature width.
    pub fn new(config: ModelConfig, graph: &FraudGraph, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();

        let layers = Self::layer_specs(&config, graph.feature_dim())
            .into_iter()
            .enumerate()
            .map(|(i, spec)| MultiRelationLayer::new(graph, spec, vb.pp(format!("layer_{i}"))))
            .collect::<Result<Vec<_>>>()?;

        debug!(n_layer = layers.len(), stats = ?graph.stats(), "built DualHfdNet");
        Ok(Self {
            layers,
            dropout: Dropout::new(config.dropout),
            config,
            input_dim: graph.feature_dim(),
            device,
        })
    }

    /// Layer shapes for a configuration and input width.
    fn layer_specs(config: &ModelConfig, input_dim: usize) -> Vec<LayerSpec> {
        let spec = |input_dim, output_dim, if_sum| LayerSpec {
            input_dim,
            output_dim,
            head: config.head,
            if_sum,
            dropout: config.dropout,
            negative_slope: config.leaky_relu_slope,
        };
        if config.n_layer == 1 {
            return vec![spec(input_dim, config.n_class, true)];
        }

        let hidden = config.intra_dim * config.head;
        let mut specs = vec![spec(input_dim, config.intra_dim, false)];
        specs.extend((1..config.n_layer - 1).map(|_| spec(hidden, config.intra_dim, false)));
        specs.push(spec(hidden, config.n_class, true));
        specs
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Stacked layers, input first.
    pub fn layers(&self) -> &[MultiRelationLayer] {
        &self.layers
    }

    /// Inference on the graph's own features, dropout off.
    ///
    /// # Returns
    /// - Class logits (N x n_class)
    pub fn forward(&self, graph: &FraudGraph) -> Result<Tensor> {
        let x = node_features(graph, &self.device)?;
        self.forward_t(graph, &x, false)
    }

    /// Forward pass on explicit features `(N, feature_dim)`.
    pub fn forward_t(&self, graph: &FraudGraph, x: &Tensor, train: bool) -> Result<Tensor> {
        self.check_inputs(graph, x)?;
        let labels = label_matrix(graph, self.config.n_class, x.device())?;

        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                h = self.dropout.forward(&h.relu()?, train)?;
            }
            h = layer.forward_t(graph, &h, &labels, train)?.h;
        }
        Ok(h)
    }

    /// Training loss.
    ///
    /// # Arguments
    /// - `graph`: Graph with train mask, relations and `homo` edge signs
    /// - `x`: Node features (N x feature_dim)
    /// - `labels`: Node class indices (N,), u32
    /// - `rng`: Source for the class-balanced subsamples
    pub fn loss<R: Rng>(
        &self,
        graph: &FraudGraph,
        x: &Tensor,
        labels: &Tensor,
        rng: &mut R,
    ) -> Result<ModelLoss> {
        self.check_inputs(graph, x)?;
        if !labels.device().same_device(x.device()) {
            return Err(Error::DeviceMismatch {
                expected: x.device().location(),
                got: labels.device().location(),
            });
        }
        if labels.dims() != [graph.num_nodes()] {
            return Err(Error::DimensionMismatch {
                expected: graph.num_nodes(),
                got: labels.elem_count(),
            });
        }
        let train = true;
        let device = x.device();
        let label_mat = label_matrix(graph, self.config.n_class, device)?;

        let pos = graph.train_nodes_with_label(1);
        let neg = graph.train_nodes_with_label(0);
        let index = balanced_indices(&pos, &neg, "training nodes", rng)?;

        let first = self.layers[0].loss(graph, x, labels, &label_mat, rng, train)?;
        let mut h = first.h;
        let mut edge = first.edge;
        let mut prototype = first.prototype;
        for layer in &self.layers[1..] {
            let input = self.dropout.forward(&h.relu()?, train)?;
            let out = layer.loss(graph, &input, labels, &label_mat, rng, train)?;
            edge = (edge + out.edge)?;
            prototype = (prototype + out.prototype)?;
            h = out.h;
        }

        let idx = index_tensor(&index, device)?;
        let classification = cross_entropy(&h.index_select(&idx, 0)?, &labels.index_select(&idx, 0)?)?;

        let c = &self.config;
        let total = ((&classification + (&edge * c.gamma1)?)? + (&prototype * c.gamma2)?)?;
        let total = (total + (&first.propagation * c.gamma3)?)?;
        Ok(ModelLoss {
            total,
            classification,
            edge,
            prototype,
            propagation: first.propagation,
        })
    }

    fn check_inputs(&self, graph: &FraudGraph, x: &Tensor) -> Result<()> {
        if !x.device().same_device(&self.device) {
            return Err(Error::DeviceMismatch {
                expected: self.device.location(),
                got: x.device().location(),
            });
        }
        let (n, f) = x.dims2()?;
        if n != graph.num_nodes() {
            return Err(Error::DimensionMismatch {
                expected: graph.num_nodes(),
                got: n,
            });
        }
        if f != self.input_dim {
            return Err(Error::DimensionMismatch {
                expected: self.input_dim,
                got: f,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_specs_single_layer_sums() {
        let config = ModelConfig {
            n_layer: 1,
            head: 3,
            n_class: 2,
            ..Default::default()
        };
        let specs = DualHfdNet::layer_specs(&config, 10);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].input_dim, 10);
        assert!(specs[0].if_sum);
        assert_eq!(specs[0].width(), 2);
    }

    #[test]
    fn test_layer_specs_chain_widths() {
        let config = ModelConfig {
            n_layer: 4,
            intra_dim: 8,
            head: 2,
            n_class: 2,
            ..Default::default()
        };
        let specs = DualHfdNet::layer_specs(&config, 5);
        let dims: Vec<_> = specs.iter().map(|s| (s.input_dim, s.width())).collect();
        assert_eq!(dims, vec![(5, 16), (16, 16), (16, 16), (16, 2)]);
        for pair in specs.windows(2) {
            assert_eq!(pair[0].width(), pair[1].input_dim);
        }
    }
}
