//! HNSW insertion: greedy descent, neighbor selection, reverse edges.
//!
//! Insertion is split in two phases. `prepare_level_tab` (in graph.rs) runs
//! sequentially and allocates level assignments and empty neighbor blocks
//! for a whole batch; `add_with_locks` then links one node and is safe to
//! run concurrently for different nodes. Writers take exactly one node lock
//! at a time, so the protocol cannot deadlock; readers never lock.

use crate::hnsw::graph::HnswGraph;
use crate::search::best_first::{cmp_dist_then_id, Adjacency};
use crate::search::{best_first_search, fill_remaining, prune_neighbors, VisitedTable, EMPTY_ID};
use crate::storage::DistanceComputer;
use parking_lot::Mutex;

impl HnswGraph {
    /// Single-path greedy step at one level: move to strictly closer
    /// neighbors of the current nearest until none exists.
    pub(crate) fn greedy_update_nearest(
        &self,
        dis: &dyn DistanceComputer,
        level: usize,
        nearest: &mut i32,
        d_nearest: &mut f32,
    ) {
        loop {
            let prev = *nearest;
            self.level_view(level).for_each_neighbor(prev, |v| {
                let d = dis.distance(v);
                if d < *d_nearest {
                    *nearest = v;
                    *d_nearest = d;
                }
            });
            if *nearest == prev {
                return;
            }
        }
    }

    /// Link node `pt_id` (already allocated at `pt_level`) into the graph.
    ///
    /// `dis` must be bound to the node's vector. `locks` has one mutex per
    /// node; `entry_guard` serializes entry-point transitions. The very
    /// first node only claims the entry point and gets no links.
    pub(crate) fn add_with_locks(
        &self,
        dis: &dyn DistanceComputer,
        pt_level: i32,
        pt_id: i32,
        locks: &[Mutex<()>],
        entry_guard: &Mutex<()>,
        vt: &mut VisitedTable,
    ) {
        // Entry point and top level are read in one critical section so a
        // concurrent promotion cannot be observed half-applied
        let (entry, max_level) = {
            let _g = entry_guard.lock();
            let ep = self.entry_point();
            if ep == EMPTY_ID {
                self.store_entry(pt_id, pt_level);
            }
            (ep, self.max_level())
        };
        if entry == EMPTY_ID {
            return;
        }

        let mut nearest = entry;
        let mut d_nearest = dis.distance(nearest);

        // Phase 1: descend above the node's level with a single-path walk
        let mut level = max_level;
        while level > pt_level {
            self.greedy_update_nearest(dis, level as usize, &mut nearest, &mut d_nearest);
            level -= 1;
        }

        // Phase 2: per level, search with ef_construction, select neighbors
        // by the pruning heuristic, publish, and install reverse edges
        let mut entries: Vec<i32> = vec![nearest];
        let top = pt_level.min(max_level);
        for level in (0..=top).rev() {
            let level = level as usize;
            if level == 0 && !self.params.init_level0 {
                break;
            }
            let candidates = best_first_search(
                &self.level_view(level),
                dis,
                &entries,
                self.params.ef_construction,
                vt,
                None,
            );
            vt.advance();

            let cap = self.nb_neighbors(level);
            let mut selected = prune_neighbors(dis, &candidates, cap);
            if level == 0 && self.params.keep_max_size_level0 {
                fill_remaining(&candidates, &mut selected, cap);
            }

            let ids: Vec<i32> = selected.iter().map(|&(_, id)| id).collect();
            {
                let _g = locks[pt_id as usize].lock();
                self.set_neighbors(pt_id, level, &ids);
            }
            for &(d, dest) in &selected {
                self.add_link(dis, dest, pt_id, d, level, locks);
            }

            entries.clear();
            entries.extend(candidates.iter().map(|&(_, id)| id));
            if entries.is_empty() {
                entries.push(nearest);
            }
        }

        // Phase 3: promote the entry point if this node tops the hierarchy
        if pt_level > self.max_level() {
            let _g = entry_guard.lock();
            if pt_level > self.max_level() {
                self.store_entry(pt_id, pt_level);
            }
        }
    }

    /// Install the reverse edge `dest → new_id`, re-pruning `dest`'s list
    /// when it would exceed capacity. Holds only `dest`'s lock.
    fn add_link(
        &self,
        dis: &dyn DistanceComputer,
        dest: i32,
        new_id: i32,
        d_new: f32,
        level: usize,
        locks: &[Mutex<()>],
    ) {
        let _g = locks[dest as usize].lock();
        let mut ids = self.neighbors_of(dest, level);
        if ids.contains(&new_id) {
            return;
        }
        let cap = self.nb_neighbors(level);
        if ids.len() < cap {
            ids.push(new_id);
            self.set_neighbors(dest, level, &ids);
            return;
        }

        // `d_new` is the query-to-dest distance, which equals
        // dist(dest, new_id) since the query is the new node's vector
        let mut pool: Vec<(f32, i32)> = ids
            .into_iter()
            .map(|x| (dis.symmetric(dest, x), x))
            .collect();
        pool.push((d_new, new_id));
        pool.sort_unstable_by(cmp_dist_then_id);

        let mut kept = prune_neighbors(dis, &pool, cap);
        if level == 0 && self.params.keep_max_size_level0 {
            fill_remaining(&pool, &mut kept, cap);
        }
        let ids: Vec<i32> = kept.into_iter().map(|(_, id)| id).collect();
        self.set_neighbors(dest, level, &ids);
    }
}
