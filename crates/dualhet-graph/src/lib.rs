#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]

//! Graph data for the dualhet fraud detector.
//!
//! - [`FraudGraph`] - nodes with features, labels and train/test masks,
//!   edges split into named relations
//! - [`FraudGraphBuilder`] - validating construction
//! - [`HOMO_RELATION`] - the synthetic relation carrying edge-sign labels
//! - [`sampling`] - class-balanced index sampling used by the losses
//!
//! The crate has no tensor dependency; `dualhet-nn` turns these buffers into
//! tensors per call.

mod error;
pub mod hetero;
pub mod sampling;

pub use error::{Error, Result};
pub use hetero::{
    EdgeSigns, EdgeStore, FraudGraph, FraudGraphBuilder, GraphStats, NodeIndex, HOMO_RELATION,
};
pub use sampling::balanced_indices;
