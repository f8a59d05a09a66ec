//! Product-quantized storage: k-means codebooks and ADC distance tables.
//!
//! Vectors are split into `M` subspaces with 256 centroids each, learned by
//! k-means; every vector is stored as `M` bytes. A query binds once into a
//! `[M][256]` partial-distance table, after which each node distance is `M`
//! table lookups. For the cosine metric the table stores negated dot-product
//! partials as a proxy; exact cosine values require reranking by the caller.

use crate::config;
use crate::error::{IndexError, Result};
use crate::metric::Metric;
use crate::storage::{DistanceComputer, VectorStorage};
use rand::Rng;

/// PQ codebook: `m` subspaces × 256 centroids × `sub_dim` floats.
#[derive(Debug, Clone)]
pub struct PqCodebook {
    pub num_subspaces: usize,
    pub sub_dim: usize,
    /// Flat centroid array: `centroids[m * 256 * sub_dim + k * sub_dim ..]`.
    pub centroids: Vec<f32>,
}

impl PqCodebook {
    /// Train a codebook on `n = vectors.len() / dim` sample vectors.
    fn train(vectors: &[f32], dim: usize, m: usize, rng: &mut impl Rng) -> Self {
        let sub_dim = dim / m;
        let n = vectors.len() / dim;
        let k = config::PQ_NUM_CENTROIDS;
        let mut centroids = vec![0.0f32; m * k * sub_dim];

        for sub in 0..m {
            // Gather this subspace's slices into a contiguous training set
            let mut sub_vectors = vec![0.0f32; n * sub_dim];
            for i in 0..n {
                let src = i * dim + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&vectors[src..src + sub_dim]);
            }

            let effective_k = k.min(n);
            let sub_centroids = kmeans(&sub_vectors, sub_dim, effective_k, rng);
            let out = sub * k * sub_dim;
            centroids[out..out + effective_k * sub_dim]
                .copy_from_slice(&sub_centroids[..effective_k * sub_dim]);
        }

        Self {
            num_subspaces: m,
            sub_dim,
            centroids,
        }
    }

    #[inline]
    fn centroid(&self, sub: usize, code: usize) -> &[f32] {
        let start = (sub * config::PQ_NUM_CENTROIDS + code) * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    /// Encode one vector into `m` codes, appended to `out`.
    fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        for sub in 0..self.num_subspaces {
            let sub_vec = &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            let mut best = 0u8;
            let mut best_dist = f32::MAX;
            for code in 0..config::PQ_NUM_CENTROIDS {
                let d = sq_dist(sub_vec, self.centroid(sub, code));
                if d < best_dist {
                    best_dist = d;
                    best = code as u8;
                }
            }
            out.push(best);
        }
    }
}

/// Product-quantized vector storage. Requires `train` before `add`.
#[derive(Debug, Clone)]
pub struct PqStorage {
    dim: usize,
    metric: Metric,
    num_subspaces: usize,
    codebook: Option<PqCodebook>,
    codes: Vec<u8>,
}

impl PqStorage {
    /// Creates an empty PQ storage with `num_subspaces` subspaces.
    /// `dim` must be divisible by `num_subspaces`.
    pub fn new(dim: usize, metric: Metric, num_subspaces: usize) -> Self {
        assert!(
            num_subspaces > 0 && dim % num_subspaces == 0,
            "dimension must be divisible by the number of PQ subspaces"
        );
        Self {
            dim,
            metric,
            num_subspaces,
            codebook: None,
            codes: Vec::new(),
        }
    }

    #[inline]
    fn node_codes(&self, id: i32) -> &[u8] {
        let start = id as usize * self.num_subspaces;
        &self.codes[start..start + self.num_subspaces]
    }
}

impl VectorStorage for PqStorage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.codes.len() / self.num_subspaces
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        if x.len() % self.dim != 0 || x.is_empty() {
            return Err(IndexError::DimensionMismatch {
                len: x.len(),
                dim: self.dim,
            });
        }
        let mut rng = rand::thread_rng();
        self.codebook = Some(PqCodebook::train(x, self.dim, self.num_subspaces, &mut rng));
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        let codebook = self.codebook.as_ref().ok_or(IndexError::NotTrained)?;
        if x.len() % self.dim != 0 {
            return Err(IndexError::DimensionMismatch {
                len: x.len(),
                dim: self.dim,
            });
        }
        let mut codes = Vec::with_capacity((x.len() / self.dim) * self.num_subspaces);
        for vector in x.chunks_exact(self.dim) {
            codebook.encode_into(vector, &mut codes);
        }
        self.codes.extend_from_slice(&codes);
        Ok(())
    }

    fn reset(&mut self) {
        // Codebook (training state) survives reset.
        self.codes.clear();
    }

    fn reconstruct(&self, id: i32, out: &mut [f32]) {
        let codebook = self.codebook.as_ref().expect("reconstruct on untrained PQ storage");
        let codes = self.node_codes(id);
        for (sub, &code) in codes.iter().enumerate() {
            let c = codebook.centroid(sub, code as usize);
            out[sub * codebook.sub_dim..(sub + 1) * codebook.sub_dim].copy_from_slice(c);
        }
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        let codebook = self.codebook.as_ref().expect("distance computer on untrained PQ storage");
        Box::new(PqDistanceComputer {
            storage: self,
            codebook,
            table: vec![0.0; self.num_subspaces * config::PQ_NUM_CENTROIDS],
        })
    }
}

struct PqDistanceComputer<'a> {
    storage: &'a PqStorage,
    codebook: &'a PqCodebook,
    /// `[M][256]` partial distances for the bound query.
    table: Vec<f32>,
}

impl DistanceComputer for PqDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) {
        let k = config::PQ_NUM_CENTROIDS;
        let sub_dim = self.codebook.sub_dim;
        for sub in 0..self.codebook.num_subspaces {
            let q_sub = &query[sub * sub_dim..(sub + 1) * sub_dim];
            for code in 0..k {
                let c = self.codebook.centroid(sub, code);
                self.table[sub * k + code] = match self.storage.metric {
                    Metric::L2 => sq_dist(q_sub, c),
                    Metric::InnerProduct => crate::metric::dot(q_sub, c),
                    // Dot-product proxy; see module docs.
                    Metric::Cosine => -crate::metric::dot(q_sub, c),
                };
            }
        }
    }

    fn distance(&self, id: i32) -> f32 {
        let k = config::PQ_NUM_CENTROIDS;
        let codes = self.storage.node_codes(id);
        let mut acc = 0.0f32;
        for (sub, &code) in codes.iter().enumerate() {
            acc += self.table[sub * k + code as usize];
        }
        acc
    }

    fn symmetric(&self, i: i32, j: i32) -> f32 {
        // Construction-time only: decode both sides and evaluate exactly on
        // the reconstructions.
        let mut a = vec![0.0f32; self.storage.dim];
        let mut b = vec![0.0f32; self.storage.dim];
        self.storage.reconstruct(i, &mut a);
        self.storage.reconstruct(j, &mut b);
        self.storage.metric.evaluate(&a, &b)
    }
}

/// Squared Euclidean distance between two sub-vectors.
#[inline]
fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// K-means with k-means++ initialization. Returns `k × sub_dim` centroids.
fn kmeans(data: &[f32], sub_dim: usize, k: usize, rng: &mut impl Rng) -> Vec<f32> {
    let n = data.len() / sub_dim;
    if n <= k {
        // Fewer points than centroids: each point is its own centroid
        let mut centroids = vec![0.0f32; k * sub_dim];
        centroids[..n * sub_dim].copy_from_slice(&data[..n * sub_dim]);
        return centroids;
    }

    let mut centroids = vec![0.0f32; k * sub_dim];
    let first = rng.gen_range(0..n);
    centroids[..sub_dim].copy_from_slice(&data[first * sub_dim..(first + 1) * sub_dim]);

    // k-means++: pick each next centroid with probability ∝ squared distance
    // to the nearest already-chosen one
    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = &centroids[(ci - 1) * sub_dim..ci * sub_dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let d = sq_dist(point, last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        if total < 1e-30 {
            // All remaining points coincide with existing centroids
            let idx = rng.gen_range(0..n);
            centroids[ci * sub_dim..(ci + 1) * sub_dim]
                .copy_from_slice(&data[idx * sub_dim..(idx + 1) * sub_dim]);
            continue;
        }
        let threshold = rng.gen::<f64>() * total;
        let mut cumulative = 0.0f64;
        let mut chosen = n - 1;
        for (i, &d) in min_dists.iter().enumerate() {
            cumulative += d as f64;
            if cumulative >= threshold {
                chosen = i;
                break;
            }
        }
        centroids[ci * sub_dim..(ci + 1) * sub_dim]
            .copy_from_slice(&data[chosen * sub_dim..(chosen + 1) * sub_dim]);
    }

    // Lloyd iterations
    let mut assignments = vec![0usize; n];
    for _ in 0..config::PQ_KMEANS_ITERATIONS {
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..k {
                let d = sq_dist(point, &centroids[ci * sub_dim..(ci + 1) * sub_dim]);
                if d < best_dist {
                    best_dist = d;
                    best = ci;
                }
            }
            assignments[i] = best;
        }

        let mut counts = vec![0u32; k];
        centroids.fill(0.0);
        for i in 0..n {
            let ci = assignments[i];
            counts[ci] += 1;
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let c = &mut centroids[ci * sub_dim..(ci + 1) * sub_dim];
            for d in 0..sub_dim {
                c[d] += point[d];
            }
        }
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for v in &mut centroids[ci * sub_dim..(ci + 1) * sub_dim] {
                    *v *= inv;
                }
            }
        }
    }

    centroids
}
