//! HNSW index facade: storage + multi-layer graph.

use crate::error::{IndexError, Result};
use crate::hnsw::{EntrySeeding, HnswGraph, HnswParams};
use crate::index::{flatten_topk, to_csr, RangeSearchResult};
use crate::knn::KnnGraph;
use crate::metric::Metric;
use crate::search::VisitedTable;
use crate::storage::{
    storage_distance_computer, CountingDistanceComputer, DistanceComputer, VectorStorage,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Approximate nearest-neighbor index over an HNSW graph.
///
/// Vectors are appended through [`add`](Self::add) (incremental, batched,
/// parallel within a batch); queries run through [`search`](Self::search)
/// and [`range_search`](Self::range_search). The storage backend decides
/// the metric and the encoding of stored vectors.
pub struct HnswIndex {
    storage: Box<dyn VectorStorage>,
    graph: HnswGraph,
    /// Set once the base layer is imported from an external graph; `add`
    /// is refused afterwards.
    external_base: bool,
    /// Distance evaluations during the most recent search batch.
    fetch_count: AtomicUsize,
}

impl HnswIndex {
    /// Index over `storage` with upper-layer degree `m` (layer 0 gets `2m`).
    pub fn new(storage: Box<dyn VectorStorage>, m: usize) -> Self {
        Self::with_params(storage, HnswParams::with_m(m))
    }

    pub fn with_params(storage: Box<dyn VectorStorage>, params: HnswParams) -> Self {
        Self {
            storage,
            graph: HnswGraph::new(params),
            external_base: false,
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

    pub fn metric(&self) -> Metric {
        self.storage.metric()
    }

    pub fn is_trained(&self) -> bool {
        self.storage.is_trained()
    }

    /// The underlying graph, for introspection and invariant checks.
    pub fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    pub fn params(&self) -> &HnswParams {
        &self.graph.params
    }

    /// Adjust the query-time exploration width.
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.graph.params.ef_search = ef_search;
    }

    /// Distance evaluations performed by the most recent search batch.
    /// A lower bound when batches run concurrently.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Train the storage backend (no-op for flat and scalar storage).
    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        self.storage.train(x)
    }

    /// Append `x.len() / d` vectors and link them into the graph. New nodes
    /// are processed level bucket by level bucket, highest first, in
    /// parallel within each bucket.
    pub fn add(&mut self, x: &[f32]) -> Result<()> {
        if self.external_base {
            return Err(IndexError::ExternalBaseLayer);
        }
        if !self.storage.is_trained() {
            return Err(IndexError::NotTrained);
        }
        let d = self.storage.dim();
        if x.len() % d != 0 {
            return Err(IndexError::DimensionMismatch { len: x.len(), dim: d });
        }
        let n = x.len() / d;
        if n == 0 {
            return Ok(());
        }

        let n0 = self.storage.len();
        self.storage.add(x)?;
        let mut rng = rand::thread_rng();
        self.graph.prepare_level_tab(n, &mut rng);

        let ntotal = n0 + n;
        let locks: Vec<Mutex<()>> = (0..ntotal).map(|_| Mutex::new(())).collect();
        let entry_guard = Mutex::new(());

        let storage = &*self.storage;
        let graph = &self.graph;

        let mut order: Vec<i32> = (n0 as i32..ntotal as i32).collect();
        order.sort_by_key(|&i| (std::cmp::Reverse(graph.level(i)), i));

        let mut start = 0;
        while start < order.len() {
            let level = graph.level(order[start]);
            let mut end = start;
            while end < order.len() && graph.level(order[end]) == level {
                end += 1;
            }
            order[start..end].par_iter().for_each_init(
                || {
                    (
                        VisitedTable::new(ntotal),
                        storage_distance_computer(storage),
                    )
                },
                |(vt, dis), &i| {
                    let base = (i as usize - n0) * d;
                    dis.set_query(&x[base..base + d]);
                    graph.add_with_locks(&**dis, graph.level(i), i, &locks, &entry_guard, vt);
                },
            );
            start = end;
        }

        tracing::debug!(added = n, total = ntotal, "hnsw add complete");
        Ok(())
    }

    /// Top-k batch search. Returns `(distances, labels)` of shape `n×k`;
    /// unfilled slots hold `+∞` / `-1` (`-∞` after the similarity flip).
    pub fn search(&self, x: &[f32], k: usize) -> (Vec<f32>, Vec<i64>) {
        let d = self.storage.dim();
        self.fetch_count.store(0, Ordering::Relaxed);
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

    /// Level-0 search from pre-computed entry points, `nprobe` per query.
    /// `entries` is row-major `n×nprobe`; sentinel entries are skipped.
    pub fn search_level_0(
        &self,
        x: &[f32],
        k: usize,
        entries: &[i32],
        nprobe: usize,
        seeding: EntrySeeding,
    ) -> (Vec<f32>, Vec<i64>) {
        let d = self.storage.dim();
        self.fetch_count.store(0, Ordering::Relaxed);
        let negate = self.storage.metric().is_similarity();
        let ntotal = self.graph.len();

        let rows: Vec<Vec<(f32, i32)>> = x
            .par_chunks(d)
            .enumerate()
            .map_init(
                || (VisitedTable::new(ntotal), self.query_computer()),
                |(vt, dis), (qi, query)| {
                    dis.set_query(query);
                    let seeds = &entries[qi * nprobe..(qi + 1) * nprobe];
                    self.graph.search_level_0(&**dis, k, seeds, seeding, vt)
                },
            )
            .collect();

        flatten_topk(rows, k, negate)
    }

    /// Reconstruct stored vector `id` (lossy for quantized storage).
    pub fn reconstruct(&self, id: i32) -> Vec<f32> {
        let mut out = vec![0.0f32; self.storage.dim()];
        self.storage.reconstruct(id, &mut out);
        out
    }

    /// Clear the graph and the storage. Idempotent.
    pub fn reset(&mut self) {
        self.graph.reset();
        self.storage.reset();
        self.external_base = false;
        self.fetch_count.store(0, Ordering::Relaxed);
    }

    /// Sort every neighbor list nearest-first.
    pub fn reorder_links(&mut self) {
        let Self { storage, graph, .. } = self;
        let dis = storage_distance_computer(&**storage);
        graph.reorder_links(&*dis);
    }

    /// Shrink layer-0 lists to `size` by re-running the pruning rule.
    pub fn shrink_level_0_neighbors(&mut self, size: usize) {
        let Self { storage, graph, .. } = self;
        let dis = storage_distance_computer(&**storage);
        graph.shrink_level_0_neighbors(&*dis, size);
    }

    /// Give every node with no incoming edges an edge from its nearest
    /// neighbor, so searches can reach it.
    pub fn link_singletons(&mut self) {
        let Self { storage, graph, .. } = self;
        let singletons = graph.singletons();
        if singletons.is_empty() {
            return;
        }
        tracing::debug!(count = singletons.len(), "linking singleton nodes");

        let mut dis = storage_distance_computer(&**storage);
        let mut vt = VisitedTable::new(graph.len());
        let mut buf = vec![0.0f32; storage.dim()];
        for v in singletons {
            storage.reconstruct(v, &mut buf);
            dis.set_query(&buf);
            let nearest = graph.search(&*dis, 2, &mut vt);
            if let Some(&(_, u)) = nearest.iter().find(|&&(_, id)| id != v) {
                graph.add_incoming_edge(u, v, &*dis);
            }
        }
    }

    /// Remap node ids under `perm` (`perm[new_id] = old_id`). The caller
    /// must reorder the storage to match before the next query.
    pub fn permute_entries(&mut self, perm: &[i32]) {
        self.graph.permute_entries(perm);
    }

    /// Import an externally built base layer (e.g. from a GPU k-NN graph).
    /// The graph must be empty and the storage already populated with the
    /// same `n` vectors; incremental `add` is disabled afterwards.
    pub fn init_level_0_from_knngraph(&mut self, knn: &KnnGraph) -> Result<()> {
        if !self.graph.is_empty() {
            return Err(IndexError::AlreadyBuilt);
        }
        debug_assert_eq!(knn.n(), self.storage.len());
        knn.validate()?;
        self.graph.init_level_0_from_knngraph(knn);
        self.external_base = true;
        Ok(())
    }

    fn query_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(CountingDistanceComputer::new(
            storage_distance_computer(&*self.storage),
            &self.fetch_count,
        ))
    }
}
