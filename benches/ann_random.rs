//! ANN benchmark on synthetic clustered data.
//! Measures Recall@10 and QPS for HNSW and NSG against brute-force ground truth.
//!
//! Usage: cargo bench --bench ann_random

use proxigraph::{FlatStorage, HnswIndex, Metric, NsgIndex, NsgParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

const DIM: usize = 32;
const NUM_VECTORS: usize = 20_000;
const NUM_QUERIES: usize = 500;
const NUM_CLUSTERS: usize = 50;
const K: usize = 10;

/// Gaussian-ish clusters: cluster centers in [-1, 1]^d, points jittered
/// around them. Box-Muller keeps this dependency-free.
fn clustered_vectors(n: usize, rng: &mut StdRng) -> Vec<f32> {
    let centers: Vec<f32> = (0..NUM_CLUSTERS * DIM)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();
    let mut out = Vec::with_capacity(n * DIM);
    for _ in 0..n {
        let c = rng.gen_range(0..NUM_CLUSTERS);
        for j in 0..DIM {
            let u1: f32 = rng.gen_range(1e-6f32..1.0);
            let u2: f32 = rng.gen_range(0.0f32..1.0);
            let gauss = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
            out.push(centers[c * DIM + j] + 0.15 * gauss);
        }
    }
    out
}

fn ground_truth(base: &[f32], queries: &[f32]) -> Vec<Vec<i64>> {
    queries
        .chunks_exact(DIM)
        .map(|q| {
            let mut scored: Vec<(f32, i64)> = base
                .chunks_exact(DIM)
                .enumerate()
                .map(|(i, v)| {
                    let d: f32 = v.iter().zip(q).map(|(a, b)| (a - b) * (a - b)).sum();
                    (d, i as i64)
                })
                .collect();
            scored.sort_by(|a, b| a.partial_cmp(b).unwrap());
            scored.into_iter().take(K).map(|(_, i)| i).collect()
        })
        .collect()
}

fn recall(labels: &[i64], truth: &[Vec<i64>]) -> f32 {
    let mut hits = 0;
    for (qi, t) in truth.iter().enumerate() {
        hits += labels[qi * K..(qi + 1) * K]
            .iter()
            .filter(|id| t.contains(id))
            .count();
    }
    hits as f32 / (truth.len() * K) as f32
}

fn main() {
    let mut rng = StdRng::seed_from_u64(2024);
    println!("Generating {NUM_VECTORS} vectors (d={DIM}, {NUM_CLUSTERS} clusters)...");
    let base = clustered_vectors(NUM_VECTORS, &mut rng);
    let queries = clustered_vectors(NUM_QUERIES, &mut rng);

    println!("Computing brute-force ground truth...");
    let truth = ground_truth(&base, &queries);

    // HNSW
    let mut hnsw = HnswIndex::new(Box::new(FlatStorage::new(DIM, Metric::L2)), 16);
    let t0 = Instant::now();
    hnsw.add(&base).expect("hnsw add");
    println!("HNSW build: {:.2}s", t0.elapsed().as_secs_f64());

    for ef in [16, 32, 64, 128] {
        hnsw.set_ef_search(ef);
        let t0 = Instant::now();
        let (_, labels) = hnsw.search(&queries, K);
        let elapsed = t0.elapsed().as_secs_f64();
        println!(
            "HNSW ef={ef:>3}  Recall@{K}: {:.4}  QPS: {:.0}  fetches/query: {:.0}",
            recall(&labels, &truth),
            NUM_QUERIES as f64 / elapsed,
            hnsw.fetch_count() as f64 / NUM_QUERIES as f64,
        );
    }

    // NSG
    let mut nsg = NsgIndex::with_params(
        Box::new(FlatStorage::new(DIM, Metric::L2)),
        NsgParams {
            gk: 32,
            ..NsgParams::with_r(24)
        },
    );
    let t0 = Instant::now();
    nsg.add(&base).expect("nsg add");
    println!("NSG build: {:.2}s", t0.elapsed().as_secs_f64());

    for search_l in [16, 32, 64, 128] {
        nsg.set_search_l(search_l);
        let t0 = Instant::now();
        let (_, labels) = nsg.search(&queries, K);
        let elapsed = t0.elapsed().as_secs_f64();
        println!(
            "NSG  L={search_l:>3}  Recall@{K}: {:.4}  QPS: {:.0}  fetches/query: {:.0}",
            recall(&labels, &truth),
            NUM_QUERIES as f64 / elapsed,
            nsg.fetch_count() as f64 / NUM_QUERIES as f64,
        );
    }
}
