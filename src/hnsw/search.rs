//! HNSW queries: greedy descent, level-0 search, entry-point variants,
//! range search.

use crate::hnsw::graph::HnswGraph;
use crate::search::best_first::cmp_dist_then_id;
use crate::search::{best_first_search, range_search_from, VisitedTable, EMPTY_ID};
use crate::storage::DistanceComputer;

/// How pre-computed entry points seed a level-0 search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySeeding {
    /// One search per entry point; results merged. Later probes skip nodes
    /// already visited by earlier ones.
    PerEntry,
    /// All entry points enter one shared candidate set.
    AllAtOnce,
}

impl HnswGraph {
    /// Top-k search: single-path descent from the entry point down to level
    /// 1, then a level-0 search with `ef = max(ef_search, k)`. Results come
    /// back nearest-first; `dis` must already be bound to the query.
    pub fn search(
        &self,
        dis: &dyn DistanceComputer,
        k: usize,
        vt: &mut VisitedTable,
    ) -> Vec<(f32, i32)> {
        let entry = self.entry_point();
        if entry == EMPTY_ID {
            return Vec::new();
        }

        let mut nearest = entry;
        let mut d_nearest = dis.distance(nearest);
        let mut level = self.max_level();
        while level > 0 {
            self.greedy_update_nearest(dis, level as usize, &mut nearest, &mut d_nearest);
            level -= 1;
        }

        let ef = self.params.ef_search.max(k);
        let mut results = best_first_search(&self.level_view(0), dis, &[nearest], ef, vt, None);
        vt.advance();
        results.truncate(k);
        results
    }

    /// Level-0 search from externally supplied entry points (coarse
    /// quantizer cells, an imported base graph, ...). No descent happens;
    /// sentinel entries are ignored.
    pub fn search_level_0(
        &self,
        dis: &dyn DistanceComputer,
        k: usize,
        entries: &[i32],
        seeding: EntrySeeding,
        vt: &mut VisitedTable,
    ) -> Vec<(f32, i32)> {
        if self.is_empty() {
            return Vec::new();
        }
        let ef = self.params.ef_search.max(k);
        let mut results = match seeding {
            EntrySeeding::AllAtOnce => {
                best_first_search(&self.level_view(0), dis, entries, ef, vt, None)
            }
            EntrySeeding::PerEntry => {
                // The visited table is shared across probes, so each node is
                // scored once and the merged pool is duplicate-free
                let mut pool = Vec::new();
                for &entry in entries {
                    pool.extend(best_first_search(
                        &self.level_view(0),
                        dis,
                        &[entry],
                        ef,
                        vt,
                        None,
                    ));
                }
                pool.sort_unstable_by(cmp_dist_then_id);
                pool
            }
        };
        vt.advance();
        results.truncate(k);
        results
    }

    /// Range search: descend to level 1, then collect every node within
    /// `radius` at level 0. Results are nearest-first.
    pub fn range_search(
        &self,
        dis: &dyn DistanceComputer,
        radius: f32,
        vt: &mut VisitedTable,
    ) -> Vec<(f32, i32)> {
        let entry = self.entry_point();
        if entry == EMPTY_ID {
            return Vec::new();
        }

        let mut nearest = entry;
        let mut d_nearest = dis.distance(nearest);
        let mut level = self.max_level();
        while level > 0 {
            self.greedy_update_nearest(dis, level as usize, &mut nearest, &mut d_nearest);
            level -= 1;
        }

        let results = range_search_from(&self.level_view(0), dis, &[nearest], radius, vt);
        vt.advance();
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswParams;
    use crate::metric::Metric;
    use crate::search::VisitedTable;
    use crate::storage::{storage_distance_computer, FlatStorage, VectorStorage};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build_line(n: usize, m: usize) -> (HnswGraph, FlatStorage) {
        let mut storage = FlatStorage::new(2, Metric::L2);
        let flat: Vec<f32> = (0..n).flat_map(|i| [i as f32, 0.0]).collect();
        storage.add(&flat).unwrap();

        let mut graph = HnswGraph::new(HnswParams::with_m(m));
        let mut rng = StdRng::seed_from_u64(9);
        graph.prepare_level_tab(n, &mut rng);
        let locks: Vec<Mutex<()>> = (0..n).map(|_| Mutex::new(())).collect();
        let entry_guard = Mutex::new(());
        let mut vt = VisitedTable::new(n);
        let mut dis = storage_distance_computer(&storage);
        let mut order: Vec<i32> = (0..n as i32).collect();
        order.sort_by_key(|&i| (-graph.level(i), i));
        for &i in &order {
            dis.set_query(&flat[i as usize * 2..i as usize * 2 + 2]);
            graph.add_with_locks(&*dis, graph.level(i), i, &locks, &entry_guard, &mut vt);
        }
        drop(dis);
        (graph, storage)
    }

    #[test]
    fn test_search_identity() {
        let (graph, storage) = build_line(5, 4);
        let mut dis = storage_distance_computer(&storage);
        dis.set_query(&[0.0, 0.0]);
        let mut vt = VisitedTable::new(5);
        let res = graph.search(&*dis, 3, &mut vt);
        let ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        let dists: Vec<f32> = res.iter().map(|&(d, _)| d).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(dists, vec![0.0, 1.0, 4.0]);
    }

    #[test]
    fn test_search_k_larger_than_n_returns_all() {
        let (graph, storage) = build_line(4, 4);
        let mut dis = storage_distance_computer(&storage);
        dis.set_query(&[1.4, 0.0]);
        let mut vt = VisitedTable::new(4);
        let res = graph.search(&*dis, 10, &mut vt);
        assert_eq!(res.len(), 4);
        let ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 2, 0, 3]);
    }

    #[test]
    fn test_search_empty_graph() {
        let graph = HnswGraph::new(HnswParams::with_m(4));
        let storage = FlatStorage::new(2, Metric::L2);
        let dis = storage_distance_computer(&storage);
        let mut vt = VisitedTable::new(0);
        assert!(graph.search(&*dis, 3, &mut vt).is_empty());
    }

    #[test]
    fn test_range_search_grid() {
        let (graph, storage) = build_line(10, 4);
        let mut dis = storage_distance_computer(&storage);
        dis.set_query(&[4.0, 0.0]);
        let mut vt = VisitedTable::new(10);
        let res = graph.range_search(&*dis, 4.0, &mut vt);
        let mut ids: Vec<i32> = res.iter().map(|&(_, id)| id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
        assert!(res.iter().all(|&(d, _)| d <= 4.0));
    }

    #[test]
    fn test_search_level_0_seeding_modes() {
        let (graph, storage) = build_line(30, 4);
        let mut dis = storage_distance_computer(&storage);
        dis.set_query(&[14.8, 0.0]);
        let mut vt = VisitedTable::new(30);

        let per_entry =
            graph.search_level_0(&*dis, 3, &[0, 29], EntrySeeding::PerEntry, &mut vt);
        let all_at_once =
            graph.search_level_0(&*dis, 3, &[0, 29], EntrySeeding::AllAtOnce, &mut vt);

        let ids_a: Vec<i32> = per_entry.iter().map(|&(_, id)| id).collect();
        let ids_b: Vec<i32> = all_at_once.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids_a, vec![15, 14, 16]);
        assert_eq!(ids_b, vec![15, 14, 16]);
    }

    #[test]
    fn test_reorder_links_idempotent() {
        let (mut graph, storage) = build_line(20, 4);
        let dis = storage_distance_computer(&storage);
        graph.reorder_links(&*dis);
        let first: Vec<Vec<i32>> = (0..20).map(|i| graph.neighbors_of(i, 0)).collect();
        graph.reorder_links(&*dis);
        let second: Vec<Vec<i32>> = (0..20).map(|i| graph.neighbors_of(i, 0)).collect();
        assert_eq!(first, second);
    }
}
