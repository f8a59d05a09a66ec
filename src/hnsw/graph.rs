//! HNSW graph structure: level table, flat neighbor arena, maintenance ops.
//!
//! The graph stores node ids only; vectors live in the storage collaborator.
//! Neighbor slots are `AtomicI32` so that searches can read them lock-free
//! while concurrent inserts publish updates; a slot always holds either a
//! valid node id or the empty sentinel, never garbage.

use crate::config;
use crate::knn::KnnGraph;
use crate::search::best_first::cmp_dist_then_id;
use crate::search::{prune_neighbors, Adjacency, EMPTY_ID};
use crate::storage::DistanceComputer;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

/// Tuning parameters for an HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Neighbors per node on layers ≥ 1.
    pub m: usize,
    /// Neighbors per node on layer 0 (typically `2 * m`).
    pub m0: usize,
    /// Candidate width during construction.
    pub ef_construction: usize,
    /// Candidate width during search (raised to `k` per query).
    pub ef_search: usize,
    /// When false, new nodes skip level-0 wiring. Used when the base layer
    /// comes from an external (e.g. GPU-built) graph.
    #[serde(default = "default_true")]
    pub init_level0: bool,
    /// Keep layer-0 lists topped up to `m0` after pruning.
    #[serde(default)]
    pub keep_max_size_level0: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::with_m(config::HNSW_DEFAULT_M)
    }
}

impl HnswParams {
    /// Defaults for a given `m`, with `m0 = 2 * m`.
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            m0: m * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            init_level0: true,
            keep_max_size_level0: false,
        }
    }
}

/// Multi-layer navigable small-world graph over 32-bit node ids.
#[derive(Debug)]
pub struct HnswGraph {
    pub params: HnswParams,
    /// Assigned max level of each node (level 0 is always present).
    levels: Vec<i32>,
    /// Prefix sum locating each node's neighbor block; `len() + 1` entries.
    offsets: Vec<usize>,
    /// Flat neighbor arena. Unused slots hold the empty sentinel.
    neighbors: Vec<AtomicI32>,
    /// Id of the node with the highest assigned level, or -1 when empty.
    entry_point: AtomicI32,
    /// Current top occupied level, or -1 when empty.
    max_level: AtomicI32,
}

impl HnswGraph {
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            levels: Vec::new(),
            offsets: vec![0],
            neighbors: Vec::new(),
            entry_point: AtomicI32::new(EMPTY_ID),
            max_level: AtomicI32::new(-1),
        }
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Assigned max level of node `i`.
    #[inline]
    pub fn level(&self, i: i32) -> i32 {
        self.levels[i as usize]
    }

    pub fn entry_point(&self) -> i32 {
        self.entry_point.load(Ordering::Acquire)
    }

    pub fn max_level(&self) -> i32 {
        self.max_level.load(Ordering::Acquire)
    }

    /// Neighbor capacity at a level.
    #[inline]
    pub fn nb_neighbors(&self, level: usize) -> usize {
        if level == 0 {
            self.params.m0
        } else {
            self.params.m
        }
    }

    /// Slot range of node `i` at `level` within the flat arena.
    #[inline]
    pub fn neighbor_range(&self, i: i32, level: usize) -> std::ops::Range<usize> {
        debug_assert!(level as i32 <= self.levels[i as usize]);
        let begin = self.offsets[i as usize]
            + if level == 0 {
                0
            } else {
                self.params.m0 + self.params.m * (level - 1)
            };
        begin..begin + self.nb_neighbors(level)
    }

    /// Snapshot of node `i`'s non-sentinel neighbors at `level`.
    pub fn neighbors_of(&self, i: i32, level: usize) -> Vec<i32> {
        self.neighbor_range(i, level)
            .filter_map(|slot| {
                let id = self.neighbors[slot].load(Ordering::Acquire);
                (id != EMPTY_ID).then_some(id)
            })
            .collect()
    }

    /// Publish `ids` as node `i`'s complete neighbor list at `level`.
    /// Remaining slots are cleared. Callers hold `i`'s node lock when the
    /// graph is being mutated concurrently.
    pub(crate) fn set_neighbors(&self, i: i32, level: usize, ids: &[i32]) {
        let range = self.neighbor_range(i, level);
        debug_assert!(ids.len() <= range.len());
        for (offset, slot) in range.enumerate() {
            let id = ids.get(offset).copied().unwrap_or(EMPTY_ID);
            self.neighbors[slot].store(id, Ordering::Release);
        }
    }

    /// Read-only view of one level, for the shared traversal.
    pub fn level_view(&self, level: usize) -> HnswLevelView<'_> {
        HnswLevelView { graph: self, level }
    }

    /// Publish a new entry point and top level. Callers hold the entry
    /// guard when the graph is being mutated concurrently. The entry point
    /// is stored first: a reader that sees the new id with the old (lower)
    /// max level still starts a valid descent, the other order would not.
    pub(crate) fn store_entry(&self, id: i32, level: i32) {
        self.entry_point.store(id, Ordering::Release);
        self.max_level.store(level, Ordering::Release);
    }

    /// Draw a level from the geometric distribution with `mL = 1/ln(M)`.
    pub(crate) fn random_level(&self, rng: &mut impl Rng) -> i32 {
        let ml = 1.0 / (self.params.m as f64).ln();
        let r: f64 = rng.gen();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(config::HNSW_MAX_LEVEL - 1) as i32
    }

    /// Allocate level assignments and empty neighbor blocks for `n` new
    /// nodes. Returns the highest level drawn for the batch. Linking happens
    /// afterwards via `add_with_locks`; until then the new nodes have no
    /// edges in either direction.
    pub(crate) fn prepare_level_tab(&mut self, n: usize, rng: &mut impl Rng) -> i32 {
        let mut max_new = -1;
        for _ in 0..n {
            let level = self.random_level(rng);
            max_new = max_new.max(level);
            self.levels.push(level);
            let block = self.params.m0 + self.params.m * level as usize;
            let end = self.offsets.last().copied().unwrap_or(0) + block;
            self.offsets.push(end);
            self.neighbors
                .extend((0..block).map(|_| AtomicI32::new(EMPTY_ID)));
        }
        max_new
    }

    /// Drop all nodes and edges. Parameters survive.
    pub fn reset(&mut self) {
        self.levels.clear();
        self.offsets.clear();
        self.offsets.push(0);
        self.neighbors.clear();
        self.entry_point.store(EMPTY_ID, Ordering::Release);
        self.max_level.store(-1, Ordering::Release);
    }

    /// Sort every neighbor list nearest-first. Idempotent.
    pub fn reorder_links(&mut self, dis: &dyn DistanceComputer) {
        for i in 0..self.len() as i32 {
            for level in 0..=self.levels[i as usize] as usize {
                let mut pool: Vec<(f32, i32)> = self
                    .neighbors_of(i, level)
                    .into_iter()
                    .map(|id| (dis.symmetric(i, id), id))
                    .collect();
                pool.sort_unstable_by(cmp_dist_then_id);
                let ids: Vec<i32> = pool.into_iter().map(|(_, id)| id).collect();
                self.set_neighbors(i, level, &ids);
            }
        }
    }

    /// Shrink every layer-0 list to at most `size` neighbors by re-running
    /// the heuristic pruning rule.
    pub fn shrink_level_0_neighbors(&mut self, dis: &dyn DistanceComputer, size: usize) {
        for i in 0..self.len() as i32 {
            let ids = self.neighbors_of(i, 0);
            if ids.len() <= size {
                continue;
            }
            let mut pool: Vec<(f32, i32)> = ids
                .into_iter()
                .map(|id| (dis.symmetric(i, id), id))
                .collect();
            pool.sort_unstable_by(cmp_dist_then_id);
            let kept: Vec<i32> = prune_neighbors(dis, &pool, size)
                .into_iter()
                .map(|(_, id)| id)
                .collect();
            self.set_neighbors(i, 0, &kept);
        }
    }

    /// Remap node ids under a permutation, where `perm[new_id] = old_id`.
    /// The level table, neighbor contents, and entry point are all updated;
    /// the caller is responsible for reordering the storage to match.
    pub fn permute_entries(&mut self, perm: &[i32]) {
        let n = self.len();
        assert_eq!(perm.len(), n, "permutation must cover every node");

        let mut inverse = vec![0i32; n];
        for (new_id, &old_id) in perm.iter().enumerate() {
            inverse[old_id as usize] = new_id as i32;
        }

        let mut levels = Vec::with_capacity(n);
        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0usize);
        for &old_id in perm {
            let level = self.levels[old_id as usize];
            levels.push(level);
            let block = self.params.m0 + self.params.m * level as usize;
            offsets.push(offsets.last().unwrap() + block);
        }

        let mut neighbors: Vec<AtomicI32> = Vec::with_capacity(*offsets.last().unwrap());
        for (new_id, &old_id) in perm.iter().enumerate() {
            for level in 0..=levels[new_id] as usize {
                let old_range = self.neighbor_range(old_id, level);
                for slot in old_range {
                    let id = self.neighbors[slot].load(Ordering::Acquire);
                    let mapped = if id == EMPTY_ID {
                        EMPTY_ID
                    } else {
                        inverse[id as usize]
                    };
                    neighbors.push(AtomicI32::new(mapped));
                }
            }
        }

        let old_entry = self.entry_point();
        self.levels = levels;
        self.offsets = offsets;
        self.neighbors = neighbors;
        if old_entry != EMPTY_ID {
            self.entry_point
                .store(inverse[old_entry as usize], Ordering::Release);
        }
    }

    /// Import an external base layer: every node lands at level 0 with its
    /// row from `knn` (assumed nearest-first) truncated to the layer-0
    /// capacity. The graph must be empty; node 0 becomes the entry point.
    pub fn init_level_0_from_knngraph(&mut self, knn: &KnnGraph) {
        assert!(self.is_empty(), "external base import requires an empty graph");
        let n = knn.n();
        self.levels = vec![0; n];
        self.offsets = Vec::with_capacity(n + 1);
        self.offsets.push(0);
        for i in 0..n {
            self.offsets.push((i + 1) * self.params.m0);
        }
        self.neighbors = (0..n * self.params.m0)
            .map(|_| AtomicI32::new(EMPTY_ID))
            .collect();

        for i in 0..n as i32 {
            let mut row: Vec<i32> = Vec::with_capacity(self.params.m0);
            knn.for_each_neighbor(i, |id| {
                if row.len() < self.params.m0 {
                    row.push(id);
                }
            });
            self.set_neighbors(i, 0, &row);
        }

        if n > 0 {
            self.entry_point.store(0, Ordering::Release);
            self.max_level.store(0, Ordering::Release);
        }
    }

    /// Nodes with no incoming edge on any level (the entry point excepted).
    pub fn singletons(&self) -> Vec<i32> {
        let mut in_degree = vec![0u32; self.len()];
        for i in 0..self.len() as i32 {
            for level in 0..=self.levels[i as usize] as usize {
                for id in self.neighbors_of(i, level) {
                    in_degree[id as usize] += 1;
                }
            }
        }
        let entry = self.entry_point();
        (0..self.len() as i32)
            .filter(|&i| in_degree[i as usize] == 0 && i != entry)
            .collect()
    }

    /// Add the edge `from → to` at level 0, pruning `from`'s list when that
    /// exceeds capacity. Used by singleton repair.
    pub(crate) fn add_incoming_edge(&self, from: i32, to: i32, dis: &dyn DistanceComputer) {
        let mut ids = self.neighbors_of(from, 0);
        if ids.contains(&to) {
            return;
        }
        ids.push(to);
        if ids.len() <= self.params.m0 {
            self.set_neighbors(from, 0, &ids);
            return;
        }
        let mut pool: Vec<(f32, i32)> = ids
            .into_iter()
            .map(|id| (dis.symmetric(from, id), id))
            .collect();
        pool.sort_unstable_by(cmp_dist_then_id);
        let kept: Vec<i32> = prune_neighbors(dis, &pool, self.params.m0)
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        self.set_neighbors(from, 0, &kept);
    }
}

/// One HNSW level as a traversable adjacency.
pub struct HnswLevelView<'a> {
    graph: &'a HnswGraph,
    level: usize,
}

impl Adjacency for HnswLevelView<'_> {
    fn for_each_neighbor(&self, node: i32, mut visit: impl FnMut(i32)) {
        for slot in self.graph.neighbor_range(node, self.level) {
            let id = self.graph.neighbors[slot].load(Ordering::Acquire);
            if id != EMPTY_ID {
                visit(id);
            }
        }
    }
}
