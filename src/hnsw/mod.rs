//! Hierarchical Navigable Small World (HNSW) proximity graph.
//!
//! Multi-layer directed graph: layer 0 holds every node, upper layers form
//! an exponentially sparser hierarchy used for fast descent. Supports
//! incremental insertion with per-node write locks and lock-free reads.

/// Graph structure, parameters, and maintenance operations.
pub mod graph;
/// Insertion: level draws, neighbor selection, reverse edges.
pub mod insert;
/// Queries: descent, level-0 search, entry-point variants, range search.
pub mod search;

pub use graph::{HnswGraph, HnswParams};
pub use search::EntrySeeding;
