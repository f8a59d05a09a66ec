//! Scalar-quantized storage: f32 → u8 with per-vector min/scale calibration.
//!
//! Each stored vector is compressed to one byte per component by linearly
//! mapping its value range onto \[0, 255\]; `min` and `scale` are kept per
//! vector for reconstruction. Query-to-node distances use the asymmetric
//! form (f32 query against u8 codes); node-to-node distances expand the
//! quantization affinely into integer sums so the inner loops stay in i32
//! and auto-vectorize.

use crate::error::{IndexError, Result};
use crate::metric::Metric;
use crate::storage::{DistanceComputer, VectorStorage};

/// Scalar-quantized vector storage. Always trained; calibration is per vector.
#[derive(Debug, Clone)]
pub struct SqStorage {
    dim: usize,
    metric: Metric,
    codes: Vec<u8>,
    mins: Vec<f32>,
    scales: Vec<f32>,
}

/// Borrowed view of one quantized vector.
#[derive(Debug, Clone, Copy)]
struct SqRef<'a> {
    data: &'a [u8],
    min: f32,
    scale: f32,
}

impl SqStorage {
    /// Creates an empty scalar-quantized storage for dimension `dim`.
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            codes: Vec::new(),
            mins: Vec::new(),
            scales: Vec::new(),
        }
    }

    #[inline]
    fn code_ref(&self, id: i32) -> SqRef<'_> {
        let idx = id as usize;
        let start = idx * self.dim;
        SqRef {
            data: &self.codes[start..start + self.dim],
            min: self.mins[idx],
            scale: self.scales[idx],
        }
    }

    /// Quantize one vector into the arenas.
    fn push_quantized(&mut self, vector: &[f32]) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &v in vector {
            min = min.min(v);
            max = max.max(v);
        }
        let range = max - min;
        if range < f32::EPSILON {
            // Constant vector: scale 0, reconstruction collapses to `min`.
            self.codes.extend(std::iter::repeat(0u8).take(vector.len()));
            self.mins.push(min);
            self.scales.push(0.0);
            return;
        }
        let inv_scale = 255.0 / range;
        self.codes.extend(
            vector
                .iter()
                .map(|&v| ((v - min) * inv_scale).round().clamp(0.0, 255.0) as u8),
        );
        self.mins.push(min);
        self.scales.push(range / 255.0);
    }
}

impl VectorStorage for SqStorage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.mins.len()
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
        for vector in x.chunks_exact(self.dim) {
            self.push_quantized(vector);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.codes.clear();
        self.mins.clear();
        self.scales.clear();
    }

    fn reconstruct(&self, id: i32, out: &mut [f32]) {
        let r = self.code_ref(id);
        for (o, &b) in out.iter_mut().zip(r.data.iter()) {
            *o = r.min + b as f32 * r.scale;
        }
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(SqDistanceComputer {
            storage: self,
            query: vec![0.0; self.dim],
        })
    }
}

struct SqDistanceComputer<'a> {
    storage: &'a SqStorage,
    query: Vec<f32>,
}

impl DistanceComputer for SqDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) {
        self.query.copy_from_slice(query);
    }

    fn distance(&self, id: i32) -> f32 {
        let s = self.storage.code_ref(id);
        match self.storage.metric {
            Metric::L2 => l2_sq_asym(&self.query, s),
            Metric::InnerProduct => dot_asym(&self.query, s),
            Metric::Cosine => 1.0 - cosine_asym(&self.query, s),
        }
    }

    fn symmetric(&self, i: i32, j: i32) -> f32 {
        let a = self.storage.code_ref(i);
        let b = self.storage.code_ref(j);
        let sums = CodeSums::compute(a, b);
        let dot = sums.dot(a, b);
        match self.storage.metric {
            Metric::L2 => sums.norm(a) - 2.0 * dot + sums.norm_b(b),
            Metric::InnerProduct => dot,
            Metric::Cosine => {
                let denom = (sums.norm(a) as f64 * sums.norm_b(b) as f64).sqrt();
                if denom < 1e-10 {
                    1.0
                } else {
                    1.0 - (dot as f64 / denom) as f32
                }
            }
        }
    }
}

/// SIMD-friendly chunk size for the u8×u8 loops: 32 products of at most
/// 255×255 sum to well under i32::MAX.
const CHUNK_U8: usize = 32;

/// Integer sums over two code vectors; every real-valued quantity below is
/// an affine function of these.
struct CodeSums {
    n: f64,
    sum_a: i64,
    sum_b: i64,
    sum_a2: i64,
    sum_b2: i64,
    sum_ab: i64,
}

impl CodeSums {
    fn compute(a: SqRef<'_>, b: SqRef<'_>) -> Self {
        debug_assert_eq!(a.data.len(), b.data.len());
        let len = a.data.len();
        let (mut sum_a, mut sum_b, mut sum_a2, mut sum_b2, mut sum_ab) = (0i64, 0i64, 0i64, 0i64, 0i64);

        let full_chunks = len / CHUNK_U8;
        for c in 0..full_chunks {
            let base = c * CHUNK_U8;
            let (mut ca, mut cb, mut ca2, mut cb2, mut cab) = (0i32, 0i32, 0i32, 0i32, 0i32);
            for j in 0..CHUNK_U8 {
                let ai = a.data[base + j] as i32;
                let bi = b.data[base + j] as i32;
                ca += ai;
                cb += bi;
                ca2 += ai * ai;
                cb2 += bi * bi;
                cab += ai * bi;
            }
            sum_a += ca as i64;
            sum_b += cb as i64;
            sum_a2 += ca2 as i64;
            sum_b2 += cb2 as i64;
            sum_ab += cab as i64;
        }
        for i in (full_chunks * CHUNK_U8)..len {
            let ai = a.data[i] as i64;
            let bi = b.data[i] as i64;
            sum_a += ai;
            sum_b += bi;
            sum_a2 += ai * ai;
            sum_b2 += bi * bi;
            sum_ab += ai * bi;
        }

        Self {
            n: len as f64,
            sum_a,
            sum_b,
            sum_a2,
            sum_b2,
            sum_ab,
        }
    }

    /// Real-valued dot product reconstructed from the code sums.
    fn dot(&self, a: SqRef<'_>, b: SqRef<'_>) -> f32 {
        let (sa, sb) = (a.scale as f64, b.scale as f64);
        let (ma, mb) = (a.min as f64, b.min as f64);
        (sa * sb * self.sum_ab as f64
            + ma * sb * self.sum_b as f64
            + mb * sa * self.sum_a as f64
            + ma * mb * self.n) as f32
    }

    /// Real-valued squared norm of `a`.
    fn norm(&self, a: SqRef<'_>) -> f32 {
        let sa = a.scale as f64;
        let ma = a.min as f64;
        (sa * sa * self.sum_a2 as f64 + 2.0 * ma * sa * self.sum_a as f64 + ma * ma * self.n) as f32
    }

    /// Real-valued squared norm of `b`.
    fn norm_b(&self, b: SqRef<'_>) -> f32 {
        let sb = b.scale as f64;
        let mb = b.min as f64;
        (sb * sb * self.sum_b2 as f64 + 2.0 * mb * sb * self.sum_b as f64 + mb * mb * self.n) as f32
    }
}

/// SIMD-friendly chunk size for f32-vs-u8 asymmetric loops.
const CHUNK_F32: usize = 8;

fn l2_sq_asym(query: &[f32], s: SqRef<'_>) -> f32 {
    debug_assert_eq!(query.len(), s.data.len());
    let len = query.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK_F32;
    for c in 0..full_chunks {
        let base = c * CHUNK_F32;
        let mut acc = 0.0f32;
        for j in 0..CHUNK_F32 {
            let v = s.min + s.data[base + j] as f32 * s.scale;
            let diff = query[base + j] - v;
            acc += diff * diff;
        }
        sum += acc as f64;
    }
    for i in (full_chunks * CHUNK_F32)..len {
        let v = s.min as f64 + s.data[i] as f64 * s.scale as f64;
        let diff = query[i] as f64 - v;
        sum += diff * diff;
    }

    sum as f32
}

fn dot_asym(query: &[f32], s: SqRef<'_>) -> f32 {
    debug_assert_eq!(query.len(), s.data.len());
    let len = query.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK_F32;
    for c in 0..full_chunks {
        let base = c * CHUNK_F32;
        let mut acc = 0.0f32;
        for j in 0..CHUNK_F32 {
            let v = s.min + s.data[base + j] as f32 * s.scale;
            acc += query[base + j] * v;
        }
        sum += acc as f64;
    }
    for i in (full_chunks * CHUNK_F32)..len {
        let v = s.min as f64 + s.data[i] as f64 * s.scale as f64;
        sum += query[i] as f64 * v;
    }

    sum as f32
}

fn cosine_asym(query: &[f32], s: SqRef<'_>) -> f32 {
    debug_assert_eq!(query.len(), s.data.len());
    let len = query.len();
    let mut dot = 0.0f64;
    let mut norm_q = 0.0f64;
    let mut norm_s = 0.0f64;

    for i in 0..len {
        let q = query[i] as f64;
        let v = s.min as f64 + s.data[i] as f64 * s.scale as f64;
        dot += q * v;
        norm_q += q * q;
        norm_s += v * v;
    }

    let denom = norm_q.sqrt() * norm_s.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}
