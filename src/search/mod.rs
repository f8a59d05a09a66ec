//! Shared traversal primitives: the greedy best-first search used by both
//! graph families, the heuristic pruning rule, and the visited table.

/// Best-first search, range search, and heuristic pruning over any adjacency.
pub mod best_first;
/// Generation-stamped visited set with O(1) amortized reset.
pub mod visited;

pub use best_first::{
    best_first_search, fill_remaining, prune_neighbors, range_search_from, Adjacency, EMPTY_ID,
};
pub use visited::VisitedTable;
