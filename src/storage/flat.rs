//! Flat storage: raw f32 vectors in a contiguous arena.

use crate::error::{IndexError, Result};
use crate::metric::Metric;
use crate::storage::{DistanceComputer, VectorStorage};

/// Raw f32 vector storage. No training, no compression, exact distances.
#[derive(Debug, Clone)]
pub struct FlatStorage {
    dim: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl FlatStorage {
    /// Creates an empty flat storage for vectors of dimension `dim`.
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            data: Vec::new(),
        }
    }

    /// Borrow stored vector `id`. O(1) slice into the arena.
    #[inline]
    pub fn vector(&self, id: i32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }
}

impl VectorStorage for FlatStorage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn train(&mut self, _x: &[f32]) -> Result<()> {
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        if x.len() % self.dim != 0 {
            return Err(IndexError::DimensionMismatch {
                len: x.len(),
                dim: self.dim,
            });
        }
        self.data.extend_from_slice(x);
        Ok(())
    }

    fn reset(&mut self) {
        self.data.clear();
    }

    fn reconstruct(&self, id: i32, out: &mut [f32]) {
        out.copy_from_slice(self.vector(id));
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(FlatDistanceComputer {
            storage: self,
            query: vec![0.0; self.dim],
        })
    }
}

struct FlatDistanceComputer<'a> {
    storage: &'a FlatStorage,
    query: Vec<f32>,
}

impl DistanceComputer for FlatDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) {
        self.query.copy_from_slice(query);
    }

    fn distance(&self, id: i32) -> f32 {
        self.storage
            .metric
            .evaluate(&self.query, self.storage.vector(id))
    }

    fn symmetric(&self, i: i32, j: i32) -> f32 {
        self.storage
            .metric
            .evaluate(self.storage.vector(i), self.storage.vector(j))
    }
}
