//! NSG index facade: storage + single-layer graph, batch-only construction.

use crate::error::{IndexError, Result};
use crate::index::{flatten_topk, to_csr, RangeSearchResult};
use crate::knn::{build_knn_graph, KnnGraph};
use crate::metric::Metric;
use crate::nsg::{NsgGraph, NsgParams};
use crate::search::VisitedTable;
use crate::storage::{
    storage_distance_computer, CountingDistanceComputer, DistanceComputer, VectorStorage,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Approximate nearest-neighbor index over an NSG graph.
///
/// Construction is batch-only: one [`add`](Self::add) call indexes the
/// whole dataset (building a brute-force k-NN seed graph internally), and a
/// second call on a non-empty index fails with
/// [`IndexError::AlreadyBuilt`]. An externally produced seed graph (e.g.
/// from NN-Descent) enters through
/// [`build_from_knn_graph`](Self::build_from_knn_graph).
pub struct NsgIndex {
    storage: Box<dyn VectorStorage>,
    graph: NsgGraph,
    /// Distance evaluations during the most recent search batch.
    fetch_count: AtomicUsize,
}

impl NsgIndex {
    /// Index over `storage` with out-degree bound `r`.
    pub fn new(storage: Box<dyn VectorStorage>, r: usize) -> Self {
        Self::with_params(storage, NsgParams::with_r(r))
    }

    pub fn with_params(storage: Box<dyn VectorStorage>, params: NsgParams) -> Self {
        Self {
            storage,
            graph: NsgGraph::new(params),
            fetch_count: AtomicUsize::new(0),
        }
    }

    pub fn dim(&self) -> usize {
        self.storage.dim()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn is_built(&self) -> bool {
        self.graph.is_built()
    }

    pub fn metric(&self) -> Metric {
        self.storage.metric()
    }

    pub fn is_trained(&self) -> bool {
        self.storage.is_trained()
    }

    /// The underlying graph, for introspection and invariant checks.
    pub fn graph(&self) -> &NsgGraph {
        &self.graph
    }

    pub fn params(&self) -> &NsgParams {
        &self.graph.params
    }

    /// Adjust the query-time search width.
    pub fn set_search_l(&mut self, search_l: usize) {
        self.graph.params.search_l = search_l;
    }

    /// Distance evaluations performed by the most recent search batch.
    /// A lower bound when batches run concurrently.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Train the storage backend (quantizers need it; flat storage is a
    /// no-op). The graph itself requires no training.
    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        self.storage.train(x)
    }

    /// Index the whole dataset in one batch. Builds the k-NN seed graph by
    /// brute force with out-degree `gk`, then constructs the NSG over it.
    pub fn add(&mut self, x: &[f32]) -> Result<()> {
        self.check_addable(x)?;
        self.storage.add(x)?;
        let knn = build_knn_graph(&*self.storage, x, self.graph.params.gk)?;
        knn.validate()?;
        self.graph.build(&*self.storage, &knn)
    }

    /// Index the whole dataset using an externally supplied k-NN seed
    /// graph (one row of `knn.k()` neighbor ids per vector in `x`).
    pub fn build_from_knn_graph(&mut self, x: &[f32], knn: &KnnGraph) -> Result<()> {
        self.check_addable(x)?;
        knn.validate()?;
        self.storage.add(x)?;
        self.graph.build(&*self.storage, knn)
    }

    fn check_addable(&self, x: &[f32]) -> Result<()> {
        if self.graph.is_built() || !self.storage.is_empty() {
            return Err(IndexError::AlreadyBuilt);
        }
        if !self.storage.is_trained() {
            return Err(IndexError::NotTrained);
        }
        let d = self.storage.dim();
        if x.len() % d != 0 || x.is_empty() {
            return Err(IndexError::DimensionMismatch { len: x.len(), dim: d });
        }
        Ok(())
    }

    /// Top-k batch search. Returns `(distances, labels)` of shape `n×k`;
    /// unfilled slots hold `+∞` / `-1` (`-∞` after the similarity flip).
    pub fn search(&self, x: &[f32], k: usize) -> (Vec<f32>, Vec<i64>) {
        let d = self.storage.dim();
        self.fetch_count.store(0, Ordering::Relaxed);
        if !self.graph.is_built() {
            let n = x.len() / d;
            return flatten_topk(vec![Vec::new(); n], k, false);
        }
        let negate = self.storage.metric().is_similarity();
        let ntotal = self.graph.len();

        let rows: Vec<Vec<(f32, i32)>> = x
            .par_chunks(d)
            .map_init(
                || (VisitedTable::new(ntotal), self.query_computer()),
                |(vt, dis), query| {
                    dis.set_query(query);
                    self.graph.search(&**dis, k, vt)
                },
            )
            .collect();

        flatten_topk(rows, k, negate)
    }

    /// All indexed vectors within `radius` of each query, CSR layout. For
    /// similarity metrics the predicate is `similarity ≥ radius`.
    pub fn range_search(&self, x: &[f32], radius: f32) -> RangeSearchResult {
        let d = self.storage.dim();
        self.fetch_count.store(0, Ordering::Relaxed);
        if !self.graph.is_built() {
            let n = x.len() / d;
            return to_csr(vec![Vec::new(); n], false);
        }
        let negate = self.storage.metric().is_similarity();
        let graph_radius = if negate { -radius } else { radius };
        let ntotal = self.graph.len();

        let rows: Vec<Vec<(f32, i32)>> = x
            .par_chunks(d)
            .map_init(
                || (VisitedTable::new(ntotal), self.query_computer()),
                |(vt, dis), query| {
                    dis.set_query(query);
                    self.graph.range_search(&**dis, graph_radius, vt)
                },
            )
            .collect();

        to_csr(rows, negate)
    }

    /// Reconstruct stored vector `id` (lossy for quantized storage).
    pub fn reconstruct(&self, id: i32) -> Vec<f32> {
        let mut out = vec![0.0f32; self.storage.dim()];
        self.storage.reconstruct(id, &mut out);
        out
    }

    /// Clear the graph and the storage; the index can be built again.
    /// Idempotent.
    pub fn reset(&mut self) {
        self.graph.reset();
        self.storage.reset();
        self.fetch_count.store(0, Ordering::Relaxed);
    }

    fn query_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(CountingDistanceComputer::new(
            storage_distance_computer(&*self.storage),
            &self.fetch_count,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FlatStorage;

    fn line_index(n: usize, r: usize, gk: usize) -> NsgIndex {
        let storage = FlatStorage::new(2, Metric::L2);
        let mut index = NsgIndex::with_params(
            Box::new(storage),
            NsgParams {
                gk,
                ..NsgParams::with_r(r)
            },
        );
        let x: Vec<f32> = (0..n).flat_map(|i| [i as f32, 0.0]).collect();
        index.add(&x).unwrap();
        index
    }

    #[test]
    fn test_identity_search_with_ties() {
        let index = line_index(5, 3, 3);
        let (distances, labels) = index.search(&[2.0, 0.0], 5);
        assert_eq!(labels, vec![2, 1, 3, 0, 4]);
        assert_eq!(distances, vec![0.0, 1.0, 1.0, 4.0, 4.0]);
    }

    #[test]
    fn test_second_add_fails() {
        let mut index = line_index(5, 3, 3);
        assert!(matches!(
            index.add(&[9.0, 0.0]),
            Err(IndexError::AlreadyBuilt)
        ));
    }

    #[test]
    fn test_search_before_build_returns_fill() {
        let storage = FlatStorage::new(2, Metric::L2);
        let index = NsgIndex::new(Box::new(storage), 3);
        let (distances, labels) = index.search(&[0.0, 0.0], 2);
        assert_eq!(labels, vec![-1, -1]);
        assert!(distances.iter().all(|&d| d == f32::INFINITY));
    }

    #[test]
    fn test_reset_allows_rebuild() {
        let mut index = line_index(5, 3, 3);
        index.reset();
        assert!(!index.is_built());
        index.reset();
        let x: Vec<f32> = (0..5).flat_map(|i| [i as f32, 1.0]).collect();
        index.add(&x).unwrap();
        assert!(index.is_built());
        let (_, labels) = index.search(&[0.0, 1.0], 1);
        assert_eq!(labels, vec![0]);
    }

    #[test]
    fn test_build_from_external_knn_graph() {
        let storage = FlatStorage::new(2, Metric::L2);
        let mut index = NsgIndex::new(Box::new(storage), 2);
        let x: Vec<f32> = (0..6).flat_map(|i| [i as f32, 0.0]).collect();
        // Hand-rolled 1-nearest rows (plus a second neighbor)
        let ids = vec![1, 2, 0, 2, 1, 3, 2, 4, 3, 5, 4, 3];
        let knn = KnnGraph::new(6, 2, ids);
        index.build_from_knn_graph(&x, &knn).unwrap();
        assert!(index.is_built());
        let (_, labels) = index.search(&[5.0, 0.0], 2);
        assert_eq!(labels[0], 5);
    }

    #[test]
    fn test_range_search() {
        let index = line_index(10, 3, 3);
        let res = index.range_search(&[4.0, 0.0], 4.0);
        let mut ids = res.labels.clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_fetch_count_increments() {
        let index = line_index(10, 3, 3);
        index.search(&[5.0, 0.0], 3);
        assert!(index.fetch_count() > 0);
    }

    #[test]
    fn test_reconstruct() {
        let index = line_index(5, 3, 3);
        assert_eq!(index.reconstruct(4), vec![4.0, 0.0]);
    }
}
