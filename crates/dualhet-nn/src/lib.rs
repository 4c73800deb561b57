#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

//! Heterophily-aware attention GNN with label propagation, on candle.
//!
//! # Model
//!
//! [`DualHfdNet`] stacks [`MultiRelationLayer`]s. Each layer runs one
//! [`Aggregation`] per relation of the graph:
//!
//! - [`HeterophilyLearning`] scores every edge in (-1, 1), estimating
//!   whether its endpoints share a class
//! - messages are multiplied by that score, then attention-weighted and
//!   summed into the destination node
//! - [`LabelPropagation`] spreads training labels over a learned mask of
//!   the relation's two-hop adjacency
//!
//! Per-relation outputs are concatenated and projected back to the layer
//! width.
//!
//! # Training loss
//!
//! ```text
//! L = CE(h_final) + gamma1 · L_edge + gamma2 · L_proto + gamma3 · L_prop
//! ```
//!
//! - `L_edge`: hinge loss of edge scores against `homo` edge signs
//! - `L_proto`: cross-entropy of negative distances to class prototypes
//! - `L_prop`: NLL of the propagated label distribution (off by default)
//!
//! All node and edge subsamples are class-balanced.
//!
//! # Example
//!
//! ```rust,ignore
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use dualhet_nn::{tensors, DualHfdNet, ModelConfig};
//!
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let model = DualHfdNet::new(ModelConfig::default(), &graph, vb)?;
//!
//! let x = tensors::node_features(&graph, &device)?;
//! let y = tensors::node_labels(&graph, &device)?;
//! let loss = model.loss(&graph, &x, &y, &mut rng)?;
//! let logits = model.forward(&graph)?;
//! ```

pub mod aggregation;
pub mod config;
mod error;
pub mod heterophily;
pub mod layer;
pub mod loss;
pub mod model;
pub mod propagation;
pub mod tensors;

pub use aggregation::{Aggregation, AggregationOutput};
pub use config::ModelConfig;
pub use error::{Error, Result};
pub use heterophily::HeterophilyLearning;
pub use layer::{LayerLoss, LayerOutput, LayerSpec, MultiRelationLayer};
pub use model::{DualHfdNet, ModelLoss};
pub use propagation::{LabelPropagation, PropagationOutput};
