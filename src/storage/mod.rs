//! Vector storage collaborators.
//!
//! A [`VectorStorage`] owns the raw (or encoded) vectors; the graph layer
//! records only 32-bit node ids and asks a per-query [`DistanceComputer`]
//! for distances on demand. Three backends are provided: raw f32
//! ([`FlatStorage`]), scalar-quantized u8 codes ([`SqStorage`]), and
//! product-quantized codes ([`PqStorage`]).

/// Raw f32 storage.
pub mod flat;
/// Product quantization: k-means codebooks and ADC distance tables.
pub mod pq;
/// Scalar quantization: f32 → u8 with per-vector min/scale calibration.
pub mod scalar;

pub use flat::FlatStorage;
pub use pq::PqStorage;
pub use scalar::SqStorage;

use crate::error::Result;
use crate::metric::Metric;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stateful distance oracle bound to one query at a time.
///
/// `set_query` binds a query vector; `distance` then evaluates against a
/// stored node, and `symmetric` evaluates between two stored nodes
/// (independent of the bound query). Polarity follows the storage metric:
/// raw inner product is a similarity and must be wrapped in
/// [`NegatedDistanceComputer`] before it drives a traversal.
pub trait DistanceComputer {
    /// Bind a query vector of the storage dimension.
    fn set_query(&mut self, query: &[f32]);

    /// Distance (or raw similarity) from the bound query to stored node `id`.
    fn distance(&self, id: i32) -> f32;

    /// Distance (or raw similarity) between stored nodes `i` and `j`.
    fn symmetric(&self, i: i32, j: i32) -> f32;
}

/// Storage of `N` vectors of fixed dimension `d`.
///
/// Graphs hold a `&dyn VectorStorage` during construction and search, so the
/// trait requires `Send + Sync`; all mutation goes through `&mut self`.
pub trait VectorStorage: Send + Sync {
    /// Vector dimension `d`.
    fn dim(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Returns `true` if no vectors are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metric this storage computes distances under.
    fn metric(&self) -> Metric;

    /// Whether the backend is ready to accept vectors. Quantizers need
    /// training; flat storage is always trained.
    fn is_trained(&self) -> bool {
        true
    }

    /// Train the backend on a sample of vectors. No-op for flat storage.
    fn train(&mut self, x: &[f32]) -> Result<()>;

    /// Append vectors. `x` holds `x.len() / dim` consecutive vectors.
    fn add(&mut self, x: &[f32]) -> Result<()>;

    /// Drop all stored vectors. Training state is kept.
    fn reset(&mut self);

    /// Write (a possibly lossy reconstruction of) vector `id` into `out[0..d]`.
    fn reconstruct(&self, id: i32, out: &mut [f32]);

    /// Produce a distance computer borrowing this storage.
    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_>;

    /// Brute-force top-`k`: for each query in `x`, the ids of the `k`
    /// nearest stored vectors, nearest first, ties broken by smaller id.
    /// Rows shorter than `k` (when `k > N`) are padded with `-1`.
    ///
    /// Used by NSG to seed its k-NN graph; parallel over queries.
    fn assign(&self, x: &[f32], k: usize) -> Vec<i32> {
        let d = self.dim();
        let n = self.len();
        let similarity = self.metric().is_similarity();
        x.par_chunks(d)
            .flat_map_iter(|query| {
                let mut dis = if similarity {
                    Box::new(NegatedDistanceComputer::new(self.distance_computer()))
                        as Box<dyn DistanceComputer + '_>
                } else {
                    self.distance_computer()
                };
                dis.set_query(query);
                // Bounded max-heap of the k best; tuple order also breaks
                // distance ties toward the smaller id.
                let mut heap: BinaryHeap<(OrderedFloat<f32>, i32)> =
                    BinaryHeap::with_capacity(k + 1);
                for i in 0..n as i32 {
                    heap.push((OrderedFloat(dis.distance(i)), i));
                    if heap.len() > k {
                        heap.pop();
                    }
                }
                let mut row: Vec<i32> =
                    heap.into_sorted_vec().into_iter().map(|(_, i)| i).collect();
                row.resize(k, -1);
                row
            })
            .collect()
    }
}

/// Wraps a computer for a similarity metric so that lower is better.
///
/// The graph layer uniformly minimizes; the facade applies this wrapper on
/// the way in and negates result distances on the way out.
pub struct NegatedDistanceComputer<'a> {
    inner: Box<dyn DistanceComputer + 'a>,
}

impl<'a> NegatedDistanceComputer<'a> {
    pub fn new(inner: Box<dyn DistanceComputer + 'a>) -> Self {
        Self { inner }
    }
}

impl DistanceComputer for NegatedDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) {
        self.inner.set_query(query);
    }

    fn distance(&self, id: i32) -> f32 {
        -self.inner.distance(id)
    }

    fn symmetric(&self, i: i32, j: i32) -> f32 {
        -self.inner.symmetric(i, j)
    }
}

/// Counts every distance evaluation into a shared atomic.
///
/// Backs the per-index fetch counter. Under concurrent query batches the
/// shared counter is a lower bound for any single batch, not an exact value.
pub struct CountingDistanceComputer<'a> {
    inner: Box<dyn DistanceComputer + 'a>,
    count: &'a AtomicUsize,
}

impl<'a> CountingDistanceComputer<'a> {
    pub fn new(inner: Box<dyn DistanceComputer + 'a>, count: &'a AtomicUsize) -> Self {
        Self { inner, count }
    }
}

impl DistanceComputer for CountingDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) {
        self.inner.set_query(query);
    }

    fn distance(&self, id: i32) -> f32 {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.inner.distance(id)
    }

    fn symmetric(&self, i: i32, j: i32) -> f32 {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.inner.symmetric(i, j)
    }
}

/// Computer for `storage`, negated when its metric is a similarity.
///
/// Everything the graph layer does goes through this helper so that
/// "smaller is better" holds regardless of metric.
pub fn storage_distance_computer<'a>(
    storage: &'a dyn VectorStorage,
) -> Box<dyn DistanceComputer + 'a> {
    if storage.metric().is_similarity() {
        Box::new(NegatedDistanceComputer::new(storage.distance_computer()))
    } else {
        storage.distance_computer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_storage() -> FlatStorage {
        let mut s = FlatStorage::new(2, Metric::L2);
        s.add(&[0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0]).unwrap();
        s
    }

    #[test]
    fn test_assign_nearest_first() {
        let s = line_storage();
        let ids = s.assign(&[0.1, 0.0, 2.9, 0.0], 2);
        assert_eq!(ids, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_assign_pads_when_k_exceeds_n() {
        let s = line_storage();
        let ids = s.assign(&[0.0, 0.0], 6);
        assert_eq!(ids, vec![0, 1, 2, 3, -1, -1]);
    }

    #[test]
    fn test_assign_inner_product_orders_by_similarity() {
        let mut s = FlatStorage::new(2, Metric::InnerProduct);
        s.add(&[1.0, 0.0, 0.5, 0.5, 0.0, 1.0]).unwrap();
        let ids = s.assign(&[1.0, 0.0], 3);
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_negated_computer_flips_sign() {
        let mut s = FlatStorage::new(2, Metric::InnerProduct);
        s.add(&[1.0, 0.0]).unwrap();
        let mut dis = NegatedDistanceComputer::new(s.distance_computer());
        dis.set_query(&[2.0, 0.0]);
        assert!((dis.distance(0) - (-2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_counting_computer_counts() {
        let s = line_storage();
        let count = AtomicUsize::new(0);
        let mut dis = CountingDistanceComputer::new(s.distance_computer(), &count);
        dis.set_query(&[0.0, 0.0]);
        dis.distance(0);
        dis.distance(1);
        dis.symmetric(0, 1);
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }
}
