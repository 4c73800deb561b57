//! Multi-relational graph with a single node type.
//!
//! Nodes carry a feature row, a class label and train/test flags. Edges are
//! partitioned into named relations stored in COO form. The synthetic
//! [`HOMO_RELATION`] additionally carries an edge-sign label per edge
//! (`+1` same class, `-1` different class, `0` unlabeled) used to supervise
//! the heterophily scorer.
//!
//! # Example
//!
//! ```rust
//! use dualhet_graph::{EdgeStore, FraudGraphBuilder};
//!
//! let graph = FraudGraphBuilder::new(3, 2)
//!     .labels(vec![0, 1, 0])
//!     .train_mask(vec![true, true, true])
//!     .relation("r", EdgeStore::from_edges(vec![0, 1, 2], vec![1, 2, 0]))
//!     .homo_from_relations()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(graph.aggregation_relations(), vec!["r"]);
//! assert_eq!(graph.num_edges("homo").unwrap(), 3);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the synthetic relation carrying edge-sign supervision.
pub const HOMO_RELATION: &str = "homo";

/// Node index within the graph.
pub type NodeIndex = usize;

/// Edge storage for one relation (COO format).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStore {
    /// Source node indices.
    pub src: Vec<NodeIndex>,
    /// Destination node indices.
    pub dst: Vec<NodeIndex>,
}

impl EdgeStore {
    /// Create an empty edge store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from edge index vectors.
    pub fn from_edges(src: Vec<NodeIndex>, dst: Vec<NodeIndex>) -> Self {
        debug_assert_eq!(src.len(), dst.len());
        Self { src, dst }
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Add an edge.
    pub fn add_edge(&mut self, src: NodeIndex, dst: NodeIndex) {
        self.src.push(src);
        self.dst.push(dst);
    }

    /// Iterate over (src, dst) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }
}

/// Sign supervision for the `homo` relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSigns {
    /// `+1`, `-1`, or `0` (unlabeled), one per `homo` edge.
    pub labels: Vec<i8>,
    /// Whether the edge takes part in the edge-sign loss.
    pub train_mask: Vec<bool>,
}

/// Per-node storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct NodeStore {
    features: Vec<f32>,
    labels: Vec<u32>,
    train_mask: Vec<bool>,
    test_mask: Vec<bool>,
}

/// A single-node-type graph with typed edges and node/edge supervision.
///
/// Deserialization runs the same checks as [`FraudGraphBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFraudGraph")]
pub struct FraudGraph {
    num_nodes: usize,
    feature_dim: usize,
    nodes: NodeStore,
    /// Sorted by relation name.
    relations: BTreeMap<String, EdgeStore>,
    homo_signs: EdgeSigns,
}

impl FraudGraph {
    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Width of each node's feature row.
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Row-major `num_nodes x feature_dim` feature matrix.
    pub fn features(&self) -> &[f32] {
        &self.nodes.features
    }

    /// Node class labels.
    pub fn labels(&self) -> &[u32] {
        &self.nodes.labels
    }

    /// Training-node flags.
    pub fn train_mask(&self) -> &[bool] {
        &self.nodes.train_mask
    }

    /// Test-node flags.
    pub fn test_mask(&self) -> &[bool] {
        &self.nodes.test_mask
    }

    /// All relation names in sorted order, `homo` included.
    pub fn relations(&self) -> Vec<&str> {
        self.relations.keys().map(String::as_str).collect()
    }

    /// All relation names except `homo`, in sorted order.
    pub fn aggregation_relations(&self) -> Vec<&str> {
        self.relations
            .keys()
            .map(String::as_str)
            .filter(|r| *r != HOMO_RELATION)
            .collect()
    }

    /// Edge store of a relation.
    pub fn edges(&self, relation: &str) -> Result<&EdgeStore> {
        self.relations
            .get(relation)
            .ok_or_else(|| Error::UnknownRelation(relation.to_string()))
    }

    /// Number of edges of a relation.
    pub fn num_edges(&self, relation: &str) -> Result<usize> {
        self.edges(relation).map(EdgeStore::num_edges)
    }

    /// Sign labels and train mask of the `homo` relation.
    pub fn homo_signs(&self) -> &EdgeSigns {
        &self.homo_signs
    }

    /// Dense row-major adjacency with `A[src][dst]` counting edges `src -> dst`.
    pub fn dense_adjacency(&self, relation: &str) -> Result<Vec<f32>> {
        let n = self.num_nodes;
        let mut adj = vec![0.0f32; n * n];
        for (s, d) in self.edges(relation)?.iter() {
            adj[s * n + d] += 1.0;
        }
        Ok(adj)
    }

    /// Dense two-hop adjacency `A · A`.
    ///
    /// Computed by walking out-lists, so cost follows the number of length-2
    /// paths rather than `N^3`.
    pub fn two_hop_adjacency(&self, relation: &str) -> Result<Vec<f32>> {
        let n = self.num_nodes;
        let store = self.edges(relation)?;
        let mut out: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
        for (s, d) in store.iter() {
            out[s].push(d);
        }
        let mut two_hop = vec![0.0f32; n * n];
        for (i, k) in store.iter() {
            for &j in &out[k] {
                two_hop[i * n + j] += 1.0;
            }
        }
        Ok(two_hop)
    }

    /// One-hot `num_nodes x n_class` labels of training nodes; other rows are zero.
    ///
    /// Only training labels must lie below `n_class`; the rest are ignored.
    pub fn label_matrix(&self, n_class: usize) -> Result<Vec<f32>> {
        let mut m = vec![0.0f32; self.num_nodes * n_class];
        for (node, (&label, &train)) in self
            .nodes
            .labels
            .iter()
            .zip(&self.nodes.train_mask)
            .enumerate()
        {
            if !train {
                continue;
            }
            if label as usize >= n_class {
                return Err(Error::LabelOutOfRange {
                    node,
                    label,
                    n_class,
                });
            }
            m[node * n_class + label as usize] = 1.0;
        }
        Ok(m)
    }

    /// Training nodes whose label equals `label`.
    pub fn train_nodes_with_label(&self, label: u32) -> Vec<NodeIndex> {
        self.nodes
            .labels
            .iter()
            .zip(&self.nodes.train_mask)
            .enumerate()
            .filter_map(|(i, (&l, &t))| (t && l == label).then_some(i))
            .collect()
    }

    /// Training `homo` edges whose sign label equals `sign`.
    pub fn homo_train_edges_with_sign(&self, sign: i8) -> Vec<usize> {
        self.homo_signs
            .labels
            .iter()
            .zip(&self.homo_signs.train_mask)
            .enumerate()
            .filter_map(|(e, (&l, &t))| (t && l == sign).then_some(e))
            .collect()
    }

    /// Get statistics about the graph.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            num_nodes: self.num_nodes,
            feature_dim: self.feature_dim,
            edges_by_relation: self
                .relations
                .iter()
                .map(|(r, s)| (r.clone(), s.num_edges()))
                .collect(),
            train_positive: self.train_nodes_with_label(1).len(),
            train_negative: self.train_nodes_with_label(0).len(),
            homo_train_positive: self.homo_train_edges_with_sign(1).len(),
            homo_train_negative: self.homo_train_edges_with_sign(-1).len(),
        }
    }
}

/// Statistics for a [`FraudGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of nodes.
    pub num_nodes: usize,
    /// Node feature width.
    pub feature_dim: usize,
    /// Edges per relation.
    pub edges_by_relation: BTreeMap<String, usize>,
    /// Training nodes labeled 1.
    pub train_positive: usize,
    /// Training nodes labeled 0.
    pub train_negative: usize,
    /// Training `homo` edges labeled `+1`.
    pub homo_train_positive: usize,
    /// Training `homo` edges labeled `-1`.
    pub homo_train_negative: usize,
}

/// Homo relation source for the builder.
#[derive(Debug, Clone)]
enum HomoSpec {
    Explicit { edges: EdgeStore, signs: EdgeSigns },
    FromRelations,
}

/// Validating builder for [`FraudGraph`].
///
/// Unset node buffers default to zero features, label 0 and all-false masks.
#[derive(Debug, Clone)]
pub struct FraudGraphBuilder {
    num_nodes: usize,
    feature_dim: usize,
    features: Option<Vec<f32>>,
    labels: Option<Vec<u32>>,
    train_mask: Option<Vec<bool>>,
    test_mask: Option<Vec<bool>>,
    relations: BTreeMap<String, EdgeStore>,
    homo: Option<HomoSpec>,
}

impl FraudGraphBuilder {
    /// Start a graph with `num_nodes` nodes of `feature_dim` features each.
    pub fn new(num_nodes: usize, feature_dim: usize) -> Self {
        Self {
            num_nodes,
            feature_dim,
            features: None,
            labels: None,
            train_mask: None,
            test_mask: None,
            relations: BTreeMap::new(),
            homo: None,
        }
    }

    /// Row-major feature matrix.
    pub fn features(mut self, features: Vec<f32>) -> Self {
        self.features = Some(features);
        self
    }

    /// Node class labels.
    pub fn labels(mut self, labels: Vec<u32>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Training-node flags.
    pub fn train_mask(mut self, mask: Vec<bool>) -> Self {
        self.train_mask = Some(mask);
        self
    }

    /// Test-node flags.
    pub fn test_mask(mut self, mask: Vec<bool>) -> Self {
        self.test_mask = Some(mask);
        self
    }

    /// Add (or replace) a relation. Use [`Self::homo`] for the `homo` relation.
    pub fn relation(mut self, name: impl Into<String>, edges: EdgeStore) -> Self {
        self.relations.insert(name.into(), edges);
        self
    }

    /// Explicit `homo` edges with their sign labels and train mask.
    pub fn homo(mut self, edges: EdgeStore, signs: EdgeSigns) -> Self {
        self.homo = Some(HomoSpec::Explicit { edges, signs });
        self
    }

    /// Derive `homo` as the union of all other relations.
    ///
    /// Each edge is labeled `+1` when both endpoints share a class and `-1`
    /// otherwise; it trains when both endpoints are training nodes.
    pub fn homo_from_relations(mut self) -> Self {
        self.homo = Some(HomoSpec::FromRelations);
        self
    }

    /// Validate and assemble the graph.
    pub fn build(self) -> Result<FraudGraph> {
        let n = self.num_nodes;
        let nodes = NodeStore {
            features: self
                .features
                .unwrap_or_else(|| vec![0.0; n * self.feature_dim]),
            labels: self.labels.unwrap_or_else(|| vec![0; n]),
            train_mask: self.train_mask.unwrap_or_else(|| vec![false; n]),
            test_mask: self.test_mask.unwrap_or_else(|| vec![false; n]),
        };
        check_nodes(n, self.feature_dim, &nodes)?;

        let mut relations = self.relations;
        relations.remove(HOMO_RELATION);
        check_relations(&relations, n)?;

        let (homo_edges, homo_signs) = match self.homo {
            None => return Err(Error::MissingHomoRelation(HOMO_RELATION)),
            Some(HomoSpec::Explicit { edges, signs }) => {
                check_edges(HOMO_RELATION, &edges, n)?;
                check_signs(&edges, &signs)?;
                (edges, signs)
            }
            Some(HomoSpec::FromRelations) => {
                let mut edges = EdgeStore::new();
                let mut signs = EdgeSigns::default();
                for store in relations.values() {
                    for (s, d) in store.iter() {
                        edges.add_edge(s, d);
                        signs.labels.push(if nodes.labels[s] == nodes.labels[d] {
                            1
                        } else {
                            -1
                        });
                        signs
                            .train_mask
                            .push(nodes.train_mask[s] && nodes.train_mask[d]);
                    }
                }
                (edges, signs)
            }
        };
        relations.insert(HOMO_RELATION.to_string(), homo_edges);

        Ok(FraudGraph {
            num_nodes: n,
            feature_dim: self.feature_dim,
            nodes,
            relations,
            homo_signs,
        })
    }
}

/// Unchecked wire form of [`FraudGraph`].
#[derive(Deserialize)]
struct RawFraudGraph {
    num_nodes: usize,
    feature_dim: usize,
    nodes: NodeStore,
    relations: BTreeMap<String, EdgeStore>,
    homo_signs: EdgeSigns,
}

impl TryFrom<RawFraudGraph> for FraudGraph {
    type Error = Error;

    fn try_from(raw: RawFraudGraph) -> Result<Self> {
        check_nodes(raw.num_nodes, raw.feature_dim, &raw.nodes)?;
        check_relations(&raw.relations, raw.num_nodes)?;
        let homo = raw
            .relations
            .get(HOMO_RELATION)
            .ok_or(Error::MissingHomoRelation(HOMO_RELATION))?;
        check_signs(homo, &raw.homo_signs)?;

        Ok(FraudGraph {
            num_nodes: raw.num_nodes,
            feature_dim: raw.feature_dim,
            nodes: raw.nodes,
            relations: raw.relations,
            homo_signs: raw.homo_signs,
        })
    }
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            what,
            expected,
            got,
        })
    }
}

fn check_nodes(num_nodes: usize, feature_dim: usize, nodes: &NodeStore) -> Result<()> {
    check_len("features", num_nodes * feature_dim, nodes.features.len())?;
    check_len("labels", num_nodes, nodes.labels.len())?;
    check_len("train_mask", num_nodes, nodes.train_mask.len())?;
    check_len("test_mask", num_nodes, nodes.test_mask.len())
}

/// Every relation's endpoints in range, and at least one besides `homo`.
fn check_relations(relations: &BTreeMap<String, EdgeStore>, num_nodes: usize) -> Result<()> {
    if !relations.keys().any(|r| r != HOMO_RELATION) {
        return Err(Error::NoAggregationRelations);
    }
    relations
        .iter()
        .try_for_each(|(name, store)| check_edges(name, store, num_nodes))
}

fn check_edges(relation: &str, store: &EdgeStore, num_nodes: usize) -> Result<()> {
    check_len("edge dst", store.src.len(), store.dst.len())?;
    match store.iter().flat_map(|(s, d)| [s, d]).find(|&v| v >= num_nodes) {
        Some(node) => Err(Error::NodeOutOfRange {
            relation: relation.to_string(),
            node,
            num_nodes,
        }),
        None => Ok(()),
    }
}

fn check_signs(edges: &EdgeStore, signs: &EdgeSigns) -> Result<()> {
    check_len("homo labels", edges.num_edges(), signs.labels.len())?;
    check_len("homo train_mask", edges.num_edges(), signs.train_mask.len())?;
    match signs
        .labels
        .iter()
        .enumerate()
        .find(|(_, l)| !(-1..=1).contains(*l))
    {
        Some((edge, &label)) => Err(Error::InvalidEdgeLabel { edge, label }),
        None => Ok(()),
    }
}
