//! NSG graph structure and queries.
//!
//! A single-layer directed graph stored as a flat `N×R` adjacency matrix of
//! node ids, `-1`-padded, with one entry point (the medoid). Built in one
//! batch by [`build`](NsgGraph::build); connectivity from the entry point is
//! guaranteed after construction.

use crate::config;
use crate::search::{best_first_search, range_search_from, Adjacency, VisitedTable, EMPTY_ID};
use crate::storage::DistanceComputer;
use serde::{Deserialize, Serialize};

/// Tuning parameters for an NSG graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsgParams {
    /// Final out-degree bound.
    pub r: usize,
    /// Search width during construction (`≥ r`).
    pub l: usize,
    /// Candidate pool cap during construction.
    pub c: usize,
    /// Search width at query time (raised to `k` per query).
    pub search_l: usize,
    /// Out-degree of the k-NN seed graph built by `add`.
    pub gk: usize,
}

impl Default for NsgParams {
    fn default() -> Self {
        Self::with_r(config::NSG_DEFAULT_R)
    }
}

impl NsgParams {
    /// Defaults for a given out-degree bound `r`.
    pub fn with_r(r: usize) -> Self {
        Self {
            r,
            l: r + config::NSG_BUILD_L_MARGIN,
            c: r + config::NSG_POOL_C_MARGIN,
            search_l: config::NSG_DEFAULT_SEARCH_L,
            gk: config::NSG_DEFAULT_GK,
        }
    }
}

/// Navigating spreading-out graph over 32-bit node ids.
#[derive(Debug)]
pub struct NsgGraph {
    pub params: NsgParams,
    pub(crate) ntotal: usize,
    /// The medoid; every query starts here.
    pub(crate) enterpoint: i32,
    /// Flat `N×R` adjacency, `-1`-padded.
    pub(crate) final_graph: Vec<i32>,
    pub(crate) is_built: bool,
}

impl NsgGraph {
    pub fn new(params: NsgParams) -> Self {
        Self {
            params,
            ntotal: 0,
            enterpoint: EMPTY_ID,
            final_graph: Vec::new(),
            is_built: false,
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.ntotal
    }

    pub fn is_empty(&self) -> bool {
        self.ntotal == 0
    }

    /// Whether construction (including connectivity repair) has finished.
    pub fn is_built(&self) -> bool {
        self.is_built
    }

    /// The entry point (medoid), or -1 before construction.
    pub fn enterpoint(&self) -> i32 {
        self.enterpoint
    }

    /// Raw neighbor row of node `i`, including `-1` padding.
    #[inline]
    pub fn row(&self, i: i32) -> &[i32] {
        let r = self.params.r;
        let start = i as usize * r;
        &self.final_graph[start..start + r]
    }

    /// Non-sentinel out-degree of node `i`.
    pub fn degree(&self, i: i32) -> usize {
        self.row(i).iter().take_while(|&&id| id != EMPTY_ID).count()
    }

    /// Top-k search seeded at the entry point with width
    /// `max(search_l, k)`. `dis` must already be bound to the query.
    pub fn search(
        &self,
        dis: &dyn DistanceComputer,
        k: usize,
        vt: &mut VisitedTable,
    ) -> Vec<(f32, i32)> {
        debug_assert!(self.is_built);
        let width = self.params.search_l.max(k);
        let mut results = best_first_search(self, dis, &[self.enterpoint], width, vt, None);
        vt.advance();
        results.truncate(k);
        results
    }

    /// Every node within `radius` of the bound query, nearest-first.
    pub fn range_search(
        &self,
        dis: &dyn DistanceComputer,
        radius: f32,
        vt: &mut VisitedTable,
    ) -> Vec<(f32, i32)> {
        debug_assert!(self.is_built);
        let results = range_search_from(self, dis, &[self.enterpoint], radius, vt);
        vt.advance();
        results
    }

    /// Drop the graph. Parameters survive; `build` may run again.
    pub fn reset(&mut self) {
        self.ntotal = 0;
        self.enterpoint = EMPTY_ID;
        self.final_graph.clear();
        self.is_built = false;
    }
}

impl Adjacency for NsgGraph {
    fn for_each_neighbor(&self, node: i32, mut visit: impl FnMut(i32)) {
        // Rows are prefix-packed; the first sentinel ends the row
        for &id in self.row(node) {
            if id == EMPTY_ID {
                break;
            }
            visit(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_with_r() {
        let p = NsgParams::with_r(16);
        assert_eq!(p.r, 16);
        assert_eq!(p.l, 16 + config::NSG_BUILD_L_MARGIN);
        assert_eq!(p.c, 16 + config::NSG_POOL_C_MARGIN);
    }

    #[test]
    fn test_row_iteration_stops_at_sentinel() {
        let mut g = NsgGraph::new(NsgParams::with_r(4));
        g.ntotal = 2;
        g.final_graph = vec![1, EMPTY_ID, 1, EMPTY_ID, 0, EMPTY_ID, EMPTY_ID, EMPTY_ID];
        let mut seen = Vec::new();
        g.for_each_neighbor(0, |id| seen.push(id));
        assert_eq!(seen, vec![1]);
        assert_eq!(g.degree(0), 1);
        assert_eq!(g.degree(1), 1);
    }

    #[test]
    fn test_reset_twice_is_noop() {
        let mut g = NsgGraph::new(NsgParams::with_r(4));
        g.ntotal = 3;
        g.final_graph = vec![EMPTY_ID; 12];
        g.is_built = true;
        g.reset();
        assert!(g.is_empty());
        assert!(!g.is_built());
        g.reset();
        assert!(g.is_empty());
        assert_eq!(g.enterpoint(), EMPTY_ID);
    }
}
