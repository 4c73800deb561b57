//! Per-call tensor views of a [`FraudGraph`].
//!
//! Nothing here is cached on the graph: every forward or loss call builds
//! the tensors it needs and drops them afterwards.

use crate::error::Result;
use candle_core::{DType, Device, Tensor};
use dualhet_graph::{EdgeStore, FraudGraph};

/// Edge endpoints of one relation as index tensors.
#[derive(Debug, Clone)]
pub struct EdgeIndex {
    /// Source node per edge, `(E,)` u32.
    pub src: Tensor,
    /// Destination node per edge, `(E,)` u32.
    pub dst: Tensor,
    /// Destination node per edge on the host, for segment reductions.
    pub dst_nodes: Vec<u32>,
}

impl EdgeIndex {
    /// Build from a COO edge store.
    pub fn from_store(store: &EdgeStore, device: &Device) -> Result<Self> {
        let src: Vec<u32> = store.src.iter().map(|&s| s as u32).collect();
        let dst_nodes: Vec<u32> = store.dst.iter().map(|&d| d as u32).collect();
        let n = src.len();
        Ok(Self {
            src: Tensor::from_vec(src, n, device)?,
            dst: Tensor::from_slice(&dst_nodes, n, device)?,
            dst_nodes,
        })
    }

    /// Keep only the edges at `edges` (global edge ids).
    pub fn select(store: &EdgeStore, edges: &[usize], device: &Device) -> Result<Self> {
        let src = edges.iter().map(|&e| store.src[e]).collect();
        let dst = edges.iter().map(|&e| store.dst[e]).collect();
        Self::from_store(&EdgeStore::from_edges(src, dst), device)
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.dst_nodes.len()
    }
}

/// Node feature matrix `(N, F)`.
pub fn node_features(graph: &FraudGraph, device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(
        graph.features(),
        (graph.num_nodes(), graph.feature_dim()),
        device,
    )?)
}

/// Node labels `(N,)` as u32 class indices.
pub fn node_labels(graph: &FraudGraph, device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(graph.labels(), graph.num_nodes(), device)?)
}

/// One-hot label matrix of training nodes `(N, n_class)`.
pub fn label_matrix(graph: &FraudGraph, n_class: usize, device: &Device) -> Result<Tensor> {
    let m = graph.label_matrix(n_class)?;
    Ok(Tensor::from_vec(m, (graph.num_nodes(), n_class), device)?)
}

/// Square row-major buffer as an `(N, N)` tensor.
pub fn square_matrix(data: Vec<f32>, n: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_vec(data, (n, n), device)?)
}

/// Index list as a u32 tensor for `index_select`.
pub fn index_tensor(index: &[usize], device: &Device) -> Result<Tensor> {
    let index: Vec<u32> = index.iter().map(|&i| i as u32).collect();
    let n = index.len();
    Ok(Tensor::from_vec(index, n, device)?)
}

/// Per-edge maximum of `values` over each destination's incoming edges.
///
/// `values` is `(E, H)`; the result has the same shape, row `e` holding the
/// maximum over all edges sharing `dst_nodes[e]`. It is computed on the
/// host and carries no gradient, which is fine for a softmax shift.
pub fn segment_max(values: &Tensor, dst_nodes: &[u32]) -> Result<Tensor> {
    let rows = values.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    let heads = rows.first().map_or(0, Vec::len);
    let num_nodes = dst_nodes.iter().map(|&d| d as usize + 1).max().unwrap_or(0);

    let mut node_max = vec![f32::NEG_INFINITY; num_nodes * heads];
    for (row, &d) in rows.iter().zip(dst_nodes) {
        for (h, &v) in row.iter().enumerate() {
            let slot = &mut node_max[d as usize * heads + h];
            *slot = slot.max(v);
        }
    }

    let gathered: Vec<f32> = dst_nodes
        .iter()
        .flat_map(|&d| {
            let start = d as usize * heads;
            node_max[start..start + heads].iter().copied()
        })
        .collect();
    Ok(Tensor::from_vec(gathered, (dst_nodes.len(), heads), values.device())?
        .to_dtype(values.dtype())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_max_groups_by_destination() {
        let device = Device::Cpu;
        let values = Tensor::new(&[[1f32, -2.0], [3.0, -5.0], [0.5, 4.0]], &device).unwrap();
        // Edges 0 and 1 end at node 2, edge 2 at node 0.
        let out = segment_max(&values, &[2, 2, 0]).unwrap();
        assert_eq!(
            out.to_vec2::<f32>().unwrap(),
            vec![vec![3.0, -2.0], vec![3.0, -2.0], vec![0.5, 4.0]]
        );
    }

    #[test]
    fn test_edge_index_select() {
        let device = Device::Cpu;
        let store = EdgeStore::from_edges(vec![0, 1, 2], vec![1, 2, 0]);
        let edges = EdgeIndex::select(&store, &[2, 0], &device).unwrap();
        assert_eq!(edges.num_edges(), 2);
        assert_eq!(edges.src.to_vec1::<u32>().unwrap(), vec![2, 0]);
        assert_eq!(edges.dst_nodes, vec![0, 1]);
    }
}
