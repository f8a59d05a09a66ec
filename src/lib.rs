//! # proxigraph
//!
//! Graph-based approximate nearest-neighbor search over fixed-dimensional
//! real-valued vectors. Two independent proximity-graph families share one
//! greedy best-first traversal: a hierarchical navigable small-world graph
//! ([`hnsw`], incremental insertion) and a navigating spreading-out graph
//! ([`nsg`], batch construction from a k-NN seed graph). Vector bytes live
//! behind a pluggable [`storage`](crate::storage::VectorStorage)
//! collaborator — flat f32, scalar-quantized, or product-quantized — that
//! hands the graph layer a per-query distance computer; the graphs
//! themselves record only 32-bit node ids.

/// Global configuration constants.
pub mod config;
/// Error types.
pub mod error;
/// HNSW graph: structure, insertion, queries.
pub mod hnsw;
/// Index facades binding storage to a graph.
pub mod index;
/// k-NN seed graphs for NSG construction.
pub mod knn;
/// Distance metrics and exact f32 kernels.
pub mod metric;
/// NSG graph: structure, batch construction, queries.
pub mod nsg;
/// Shared traversal primitives: best-first search, pruning, visited table.
pub mod search;
/// Vector storage collaborators and the distance-computer contract.
pub mod storage;

pub use error::{IndexError, Result};
pub use hnsw::{EntrySeeding, HnswGraph, HnswParams};
pub use index::{HnswIndex, NsgIndex, RangeSearchResult};
pub use knn::KnnGraph;
pub use metric::Metric;
pub use nsg::{NsgGraph, NsgParams};
pub use storage::{FlatStorage, PqStorage, SqStorage, VectorStorage};
