//! Approximate k-NN seed graphs consumed by NSG construction.
//!
//! The builder here is brute force; an NN-Descent (or any other) producer
//! can hand its output to [`NsgIndex::build_from_knn_graph`](crate::index::NsgIndex::build_from_knn_graph)
//! through the same [`KnnGraph`] container.

use crate::error::{IndexError, Result};
use crate::search::{Adjacency, EMPTY_ID};
use crate::storage::VectorStorage;
use rayon::prelude::*;

/// Row-major `N×K` neighbor-id matrix. `-1` marks an empty slot; invalid
/// entries from external producers are tolerated up to the validation
/// threshold and skipped during traversal.
#[derive(Debug, Clone)]
pub struct KnnGraph {
    n: usize,
    k: usize,
    ids: Vec<i32>,
}

impl KnnGraph {
    /// Wrap an `n × k` id matrix. Panics if `ids` has the wrong length.
    pub fn new(n: usize, k: usize, ids: Vec<i32>) -> Self {
        assert_eq!(ids.len(), n * k, "knn graph must be n*k ids");
        Self { n, k, ids }
    }

    /// Number of nodes.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Out-degree of the graph.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Neighbor row of node `i`, including any invalid entries.
    #[inline]
    pub fn row(&self, i: i32) -> &[i32] {
        let start = i as usize * self.k;
        &self.ids[start..start + self.k]
    }

    /// Count invalid entries (out of range or self-loop) and decide whether
    /// the graph is usable. Fewer than `n/10` invalid entries are logged and
    /// later skipped; more is a fatal contract violation.
    pub fn validate(&self) -> Result<()> {
        let n = self.n;
        let invalid: usize = (0..n)
            .into_par_iter()
            .map(|i| {
                self.row(i as i32)
                    .iter()
                    .filter(|&&id| id < 0 || id >= n as i32 || id == i as i32)
                    .count()
            })
            .sum();

        if invalid == 0 {
            return Ok(());
        }
        if invalid < n / 10 {
            tracing::warn!(invalid, total = n * self.k, "k-NN seed graph has invalid entries; they will be ignored");
            return Ok(());
        }
        Err(IndexError::InvalidKnnGraph {
            invalid,
            total: n * self.k,
        })
    }
}

impl Adjacency for KnnGraph {
    fn for_each_neighbor(&self, node: i32, mut visit: impl FnMut(i32)) {
        for &id in self.row(node) {
            // Skip sentinels and sanitized-out invalid entries
            if id >= 0 && (id as usize) < self.n && id != node {
                visit(id);
            }
        }
    }
}

/// Build an exact k-NN graph over the freshly added vectors `x` by brute
/// force on the storage. Self-matches are filtered per neighbor row (ties
/// can put them anywhere for a non-metric distance, so every slot is
/// checked, as with inner product).
pub fn build_knn_graph(storage: &dyn VectorStorage, x: &[f32], gk: usize) -> Result<KnnGraph> {
    let n = x.len() / storage.dim();
    let bytes = n * gk * std::mem::size_of::<i32>();
    let mut ids: Vec<i32> = Vec::new();
    ids.try_reserve_exact(n * gk)
        .map_err(|_| IndexError::KnnAllocation { bytes })?;

    // One extra neighbor so dropping the self-match still leaves gk
    let assigned = storage.assign(x, gk + 1);

    for (i, row) in assigned.chunks_exact(gk + 1).enumerate() {
        let mut count = 0;
        for &id in row {
            if id != i as i32 && id != EMPTY_ID {
                ids.push(id);
                count += 1;
                if count == gk {
                    break;
                }
            }
        }
        while count < gk {
            ids.push(EMPTY_ID);
            count += 1;
        }
    }

    Ok(KnnGraph::new(n, gk, ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use crate::storage::FlatStorage;

    #[test]
    fn test_brute_force_graph_on_line() {
        let mut s = FlatStorage::new(2, Metric::L2);
        let x = [0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0];
        s.add(&x).unwrap();
        let knn = build_knn_graph(&s, &x, 3).unwrap();
        assert_eq!(knn.n(), 5);
        assert_eq!(knn.k(), 3);
        // Node 1's nearest are 0 and 2 (tie, smaller id first), then 3
        assert_eq!(knn.row(1), &[0, 2, 3]);
        // No self-loops anywhere
        for i in 0..5 {
            assert!(!knn.row(i).contains(&i));
        }
        knn.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_mostly_invalid_graph() {
        let n = 100;
        // Every row points at itself: n invalid entries ≥ n/10
        let ids: Vec<i32> = (0..n).flat_map(|i| vec![i as i32, i as i32]).collect();
        let knn = KnnGraph::new(n, 2, ids);
        assert!(matches!(
            knn.validate(),
            Err(IndexError::InvalidKnnGraph { invalid: 200, .. })
        ));
    }

    #[test]
    fn test_validate_sanitizes_few_invalid_entries() {
        let n = 100;
        let mut ids: Vec<i32> = (0..n)
            .flat_map(|i| vec![((i + 1) % n) as i32, ((i + 2) % n) as i32])
            .collect();
        // A handful of out-of-range entries, below the n/10 threshold
        ids[0] = -5;
        ids[3] = 10_000;
        let knn = KnnGraph::new(n, 2, ids);
        knn.validate().unwrap();

        // Traversal skips them
        let mut seen = Vec::new();
        knn.for_each_neighbor(0, |id| seen.push(id));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn test_rows_padded_when_gk_exceeds_n() {
        let mut s = FlatStorage::new(1, Metric::L2);
        let x = [0.0, 1.0, 2.0];
        s.add(&x).unwrap();
        let knn = build_knn_graph(&s, &x, 4).unwrap();
        assert_eq!(knn.row(0), &[1, 2, EMPTY_ID, EMPTY_ID]);
    }
}
