//! Error types for dualhet-graph.

use thiserror::Error;

/// Error type for graph construction and queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Relation name not present in the graph.
    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    /// The synthetic `homo` relation is required for edge-sign supervision.
    #[error("Missing required relation `{0}`")]
    MissingHomoRelation(&'static str),

    /// Every relation is `homo`; nothing to aggregate over.
    #[error("Graph has no relation besides `homo`")]
    NoAggregationRelations,

    /// A per-node or per-edge buffer has the wrong length.
    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Edge endpoint outside `0..num_nodes`.
    #[error("Node {node} out of range for graph with {num_nodes} nodes (relation `{relation}`)")]
    NodeOutOfRange {
        relation: String,
        node: usize,
        num_nodes: usize,
    },

    /// Node label not below the number of classes.
    #[error("Label {label} of node {node} out of range for {n_class} classes")]
    LabelOutOfRange {
        node: usize,
        label: u32,
        n_class: usize,
    },

    /// Edge sign label outside `{-1, 0, 1}`.
    #[error("Invalid edge label {label} at edge {edge}")]
    InvalidEdgeLabel { edge: usize, label: i8 },

    /// A class to be balanced has no members.
    #[error("Cannot balance {0}: one class is empty")]
    EmptyClass(&'static str),
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
