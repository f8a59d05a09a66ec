//! Index facades binding a vector storage to a proximity graph.
//!
//! Both facades speak the same batch interface: `search` returns flat
//! `n×k` distance/label arrays with `-1` labels and `+∞` distances in
//! unfilled slots (`-∞` after the sign flip for similarity metrics);
//! `range_search` returns CSR-layout results.

/// HNSW index facade.
pub mod hnsw;
/// NSG index facade.
pub mod nsg;

pub use hnsw::HnswIndex;
pub use nsg::NsgIndex;

/// CSR-layout result of a range search: query `i`'s matches occupy
/// `lims[i]..lims[i+1]` in `distances` and `labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSearchResult {
    pub lims: Vec<usize>,
    pub distances: Vec<f32>,
    pub labels: Vec<i64>,
}

/// Flatten per-query result rows into `n×k` arrays, padding with
/// `-1` / `+∞` and applying the similarity sign flip when asked.
pub(crate) fn flatten_topk(
    rows: Vec<Vec<(f32, i32)>>,
    k: usize,
    negate: bool,
) -> (Vec<f32>, Vec<i64>) {
    let n = rows.len();
    let mut distances = vec![f32::INFINITY; n * k];
    let mut labels = vec![-1i64; n * k];
    for (qi, row) in rows.into_iter().enumerate() {
        for (j, (d, id)) in row.into_iter().take(k).enumerate() {
            distances[qi * k + j] = d;
            labels[qi * k + j] = id as i64;
        }
    }
    if negate {
        for d in &mut distances {
            *d = -*d;
        }
    }
    (distances, labels)
}

/// Assemble per-query range rows into CSR layout.
pub(crate) fn to_csr(rows: Vec<Vec<(f32, i32)>>, negate: bool) -> RangeSearchResult {
    let mut lims = Vec::with_capacity(rows.len() + 1);
    lims.push(0usize);
    let total: usize = rows.iter().map(Vec::len).sum();
    let mut distances = Vec::with_capacity(total);
    let mut labels = Vec::with_capacity(total);
    for row in rows {
        for (d, id) in row {
            distances.push(if negate { -d } else { d });
            labels.push(id as i64);
        }
        lims.push(labels.len());
    }
    RangeSearchResult {
        lims,
        distances,
        labels,
    }
}
