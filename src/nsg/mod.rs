//! Navigating spreading-out graph (NSG).
//!
//! Single-layer directed proximity graph built in one batch from an
//! approximate k-NN seed graph, with the medoid as the sole entry point and
//! guaranteed connectivity after construction.

/// Construction pipeline: medoid, pruning, reverse links, repair.
pub mod build;
/// Graph structure and queries.
pub mod graph;

pub use graph::{NsgGraph, NsgParams};
