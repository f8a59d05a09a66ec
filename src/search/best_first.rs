//! Greedy best-first search over an arbitrary adjacency.
//!
//! One traversal procedure serves every graph in the crate: HNSW levels,
//! the NSG graph, and the k-NN seed graph during NSG construction. State is
//! two heaps — a min-heap of the unexplored frontier and a bounded max-heap
//! of the best `ef` results — plus a [`VisitedTable`]. Equal distances are
//! broken toward the smaller id everywhere so results are deterministic for
//! a fixed graph and entry point.
//!
//! The heuristic pruning rule shared by HNSW and NSG neighbor selection
//! also lives here.

use crate::search::visited::VisitedTable;
use crate::storage::DistanceComputer;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Sentinel for an empty neighbor slot.
pub const EMPTY_ID: i32 = -1;

/// Read-only adjacency exposed to the traversal loop.
///
/// Implementations must skip empty slots; `visit` may be called in any
/// order but each non-sentinel neighbor exactly once.
pub trait Adjacency {
    fn for_each_neighbor(&self, node: i32, visit: impl FnMut(i32));
}

/// Frontier entry. `BinaryHeap` is a max-heap, so the distance is negated;
/// on ties the smaller id pops first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: i32,
}

impl Candidate {
    #[inline]
    fn new(distance: f32, id: i32) -> Self {
        Self {
            neg_distance: OrderedFloat(-distance),
            id,
        }
    }

    #[inline]
    fn distance(&self) -> f32 {
        -self.neg_distance.0
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result-set entry. Max-heap by distance so the farthest (and, on ties,
/// the largest id) is evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: i32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Greedy best-first search from `entries`, keeping the best `ef` nodes.
///
/// `dis` must already be bound to the query. Returns up to `ef` results
/// sorted nearest-first, ids ascending among equal distances. When
/// `fullset` is given, every node whose distance was computed is appended
/// to it (NSG construction consumes the full visited set).
///
/// The caller owns the visited-table lifecycle: call
/// [`VisitedTable::advance`] once the results of this query are consumed.
pub fn best_first_search<G: Adjacency>(
    graph: &G,
    dis: &dyn DistanceComputer,
    entries: &[i32],
    ef: usize,
    visited: &mut VisitedTable,
    mut fullset: Option<&mut Vec<(f32, i32)>>,
) -> Vec<(f32, i32)> {
    let ef = ef.max(1);
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached farthest result; avoids a heap peek per admission test
    let mut worst = (f32::MAX, i32::MAX);

    for &ep in entries {
        if ep == EMPTY_ID || !visited.insert(ep) {
            continue;
        }
        let d = dis.distance(ep);
        if let Some(full) = fullset.as_mut() {
            full.push((d, ep));
        }
        candidates.push(Candidate::new(d, ep));
        results.push(ResultEntry {
            distance: OrderedFloat(d),
            id: ep,
        });
        if results.len() > ef {
            results.pop();
        }
        if results.len() == ef {
            worst = results
                .peek()
                .map_or((f32::MAX, i32::MAX), |r| (r.distance.0, r.id));
        }
    }

    while let Some(c) = candidates.pop() {
        if results.len() == ef && c.distance() > worst.0 {
            break;
        }
        graph.for_each_neighbor(c.id, |n| {
            if !visited.insert(n) {
                return;
            }
            let d = dis.distance(n);
            if let Some(full) = fullset.as_mut() {
                full.push((d, n));
            }
            if results.len() < ef || (d, n) < worst {
                candidates.push(Candidate::new(d, n));
                results.push(ResultEntry {
                    distance: OrderedFloat(d),
                    id: n,
                });
                if results.len() > ef {
                    results.pop();
                }
                if results.len() == ef {
                    worst = results
                        .peek()
                        .map_or((f32::MAX, i32::MAX), |r| (r.distance.0, r.id));
                }
            }
        });
    }

    sorted_nearest_first(results)
}

/// Radius search from `entries`: every node with distance ≤ `radius`,
/// sorted nearest-first. Entry points seed expansion even when they fall
/// outside the radius; past the seeds, only in-radius candidates expand.
pub fn range_search_from<G: Adjacency>(
    graph: &G,
    dis: &dyn DistanceComputer,
    entries: &[i32],
    radius: f32,
    visited: &mut VisitedTable,
) -> Vec<(f32, i32)> {
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut out: Vec<(f32, i32)> = Vec::new();

    let admit = |id: i32,
                     visited: &mut VisitedTable,
                     out: &mut Vec<(f32, i32)>,
                     candidates: &mut BinaryHeap<Candidate>| {
        if id == EMPTY_ID || !visited.insert(id) {
            return;
        }
        let d = dis.distance(id);
        if d <= radius {
            out.push((d, id));
            candidates.push(Candidate::new(d, id));
        }
    };

    for &ep in entries {
        if ep == EMPTY_ID || !visited.insert(ep) {
            continue;
        }
        let d = dis.distance(ep);
        if d <= radius {
            out.push((d, ep));
        }
        // Expand the seed unconditionally so a query just outside the radius
        // can still reach in-radius nodes.
        graph.for_each_neighbor(ep, |n| admit(n, visited, &mut out, &mut candidates));
    }

    while let Some(c) = candidates.pop() {
        graph.for_each_neighbor(c.id, |n| admit(n, visited, &mut out, &mut candidates));
    }

    out.sort_unstable_by(cmp_dist_then_id);
    out
}

/// Heuristic pruning rule shared by HNSW and NSG (see glossary).
///
/// Walks `pool` (sorted nearest-first relative to the base node) and admits
/// a candidate only if the base node is strictly closer to it than every
/// already-admitted neighbor is. Stops at `capacity` admits. Duplicate ids
/// are rejected. Distances between candidates come from `dis.symmetric`,
/// so the bound query is irrelevant.
pub fn prune_neighbors(
    dis: &dyn DistanceComputer,
    pool: &[(f32, i32)],
    capacity: usize,
) -> Vec<(f32, i32)> {
    debug_assert!(pool.windows(2).all(|w| w[0].0 <= w[1].0));
    let mut selected: Vec<(f32, i32)> = Vec::with_capacity(capacity);
    for &(d_base, id) in pool {
        if selected.len() == capacity {
            break;
        }
        if selected.iter().any(|&(_, s)| s == id) {
            continue;
        }
        let diverse = selected
            .iter()
            .all(|&(_, s)| d_base < dis.symmetric(s, id));
        if diverse {
            selected.push((d_base, id));
        }
    }
    selected
}

/// Top up `selected` to `capacity` with the closest unused pool entries.
/// Used when layer 0 must stay filled to its maximum size.
pub fn fill_remaining(pool: &[(f32, i32)], selected: &mut Vec<(f32, i32)>, capacity: usize) {
    for &(d, id) in pool {
        if selected.len() == capacity {
            break;
        }
        if !selected.iter().any(|&(_, s)| s == id) {
            selected.push((d, id));
        }
    }
}

/// Comparator: distance ascending, then id ascending.
pub(crate) fn cmp_dist_then_id(a: &(f32, i32), b: &(f32, i32)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

fn sorted_nearest_first(results: BinaryHeap<ResultEntry>) -> Vec<(f32, i32)> {
    let mut out: Vec<(f32, i32)> = results
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect();
    out.sort_unstable_by(cmp_dist_then_id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adjacency-list graph for tests.
    struct ListGraph(Vec<Vec<i32>>);

    impl Adjacency for ListGraph {
        fn for_each_neighbor(&self, node: i32, mut visit: impl FnMut(i32)) {
            for &n in &self.0[node as usize] {
                if n != EMPTY_ID {
                    visit(n);
                }
            }
        }
    }

    /// 1-d points under squared distance.
    struct LineDis {
        points: Vec<f32>,
        query: f32,
    }

    impl DistanceComputer for LineDis {
        fn set_query(&mut self, query: &[f32]) {
            self.query = query[0];
        }

        fn distance(&self, id: i32) -> f32 {
            let d = self.points[id as usize] - self.query;
            d * d
        }

        fn symmetric(&self, i: i32, j: i32) -> f32 {
            let d = self.points[i as usize] - self.points[j as usize];
            d * d
        }
    }

    fn path_graph(n: usize) -> ListGraph {
        // 0 - 1 - 2 - ... - (n-1), bidirectional
        let mut adj = vec![Vec::new(); n];
        for i in 0..n.saturating_sub(1) {
            adj[i].push(i as i32 + 1);
            adj[i + 1].push(i as i32);
        }
        ListGraph(adj)
    }

    fn line_dis(n: usize, query: f32) -> LineDis {
        LineDis {
            points: (0..n).map(|i| i as f32).collect(),
            query,
        }
    }

    #[test]
    fn test_finds_k_nearest_on_path() {
        let graph = path_graph(10);
        let dis = line_dis(10, 0.2);
        let mut vt = VisitedTable::new(10);
        let res = best_first_search(&graph, &dis, &[9], 3, &mut vt, None);
        let ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(res[0].0 < res[1].0 && res[1].0 < res[2].0);
    }

    #[test]
    fn test_tie_break_prefers_smaller_id() {
        // Query exactly between nodes 4 and 5
        let graph = path_graph(10);
        let dis = line_dis(10, 4.5);
        let mut vt = VisitedTable::new(10);
        let res = best_first_search(&graph, &dis, &[0], 2, &mut vt, None);
        let ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_fullset_collects_every_computed_distance() {
        let graph = path_graph(5);
        let dis = line_dis(5, 0.0);
        let mut vt = VisitedTable::new(5);
        let mut fullset = Vec::new();
        let res = best_first_search(&graph, &dis, &[4], 5, &mut vt, Some(&mut fullset));
        assert_eq!(res.len(), 5);
        assert_eq!(fullset.len(), 5);
    }

    #[test]
    fn test_sentinel_entries_are_skipped() {
        let graph = path_graph(3);
        let dis = line_dis(3, 0.0);
        let mut vt = VisitedTable::new(3);
        let res = best_first_search(&graph, &dis, &[EMPTY_ID, 1], 3, &mut vt, None);
        assert_eq!(res.len(), 3);
        assert_eq!(res[0].1, 0);
    }

    #[test]
    fn test_visited_table_must_be_advanced_between_queries() {
        let graph = path_graph(4);
        let dis = line_dis(4, 0.0);
        let mut vt = VisitedTable::new(4);
        let first = best_first_search(&graph, &dis, &[0], 4, &mut vt, None);
        assert_eq!(first.len(), 4);
        vt.advance();
        let second = best_first_search(&graph, &dis, &[0], 4, &mut vt, None);
        assert_eq!(second, first);
    }

    #[test]
    fn test_range_search_on_path() {
        let graph = path_graph(10);
        let dis = line_dis(10, 4.0);
        let mut vt = VisitedTable::new(10);
        // radius 4 in squared distance = within 2 units
        let res = range_search_from(&graph, &dis, &[4], 4.0, &mut vt);
        let mut ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
        assert!(res.iter().all(|&(d, _)| d <= 4.0));
        // Nearest-first ordering
        assert_eq!(res[0].1, 4);
    }

    #[test]
    fn test_range_search_expands_out_of_radius_seed() {
        let graph = path_graph(10);
        let dis = line_dis(10, 0.0);
        let mut vt = VisitedTable::new(10);
        // Seeded far away with a radius that covers only nodes 0..=1
        let res = range_search_from(&graph, &dis, &[2], 2.0, &mut vt);
        let mut ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_prune_collinear_points_keeps_two_sides() {
        // Points on a line, base node 2, pool sorted by distance to 2.
        // 1 occludes 0, 3 occludes 4.
        let dis = line_dis(5, 2.0);
        let pool = vec![(1.0, 1), (1.0, 3), (4.0, 0), (4.0, 4)];
        let selected = prune_neighbors(&dis, &pool, 4);
        let ids: Vec<i32> = selected.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_prune_respects_capacity_and_duplicates() {
        let dis = line_dis(6, 0.0);
        let pool = vec![(1.0, 1), (1.0, 1), (4.0, 2), (9.0, 3), (16.0, 4)];
        let selected = prune_neighbors(&dis, &pool, 1);
        assert_eq!(selected, vec![(1.0, 1)]);
    }

    #[test]
    fn test_fill_remaining_tops_up_without_duplicates() {
        let dis = line_dis(5, 2.0);
        let pool = vec![(1.0, 1), (1.0, 3), (4.0, 0), (4.0, 4)];
        let mut selected = prune_neighbors(&dis, &pool, 4);
        fill_remaining(&pool, &mut selected, 4);
        let ids: Vec<i32> = selected.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 3, 0, 4]);
    }
}
