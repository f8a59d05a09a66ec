//! NSG construction: medoid selection, pruning, reverse links, and
//! connectivity repair.
//!
//! Build consumes an approximate k-NN seed graph and runs four stages:
//! find the medoid (entry point), prune every node's candidate pool down to
//! `R` diverse neighbors in parallel, install reverse links under per-node
//! locks, then grow a spanning tree from the entry point so every node is
//! reachable. `is_built` flips only after repair succeeds.

use crate::error::{IndexError, Result};
use crate::knn::KnnGraph;
use crate::nsg::graph::NsgGraph;
use crate::search::best_first::cmp_dist_then_id;
use crate::search::{best_first_search, prune_neighbors, VisitedTable, EMPTY_ID};
use crate::storage::{storage_distance_computer, DistanceComputer, VectorStorage};
use parking_lot::Mutex;
use rand::Rng;
use rayon::prelude::*;

impl NsgGraph {
    /// Build the graph over the `n` vectors in `storage` from an
    /// approximate k-NN seed graph of the same size.
    pub fn build(&mut self, storage: &dyn VectorStorage, knn: &KnnGraph) -> Result<()> {
        if self.is_built || self.ntotal != 0 {
            return Err(IndexError::AlreadyBuilt);
        }
        let n = knn.n();
        debug_assert_eq!(storage.len(), n);
        self.ntotal = n;

        tracing::debug!(
            r = self.params.r,
            l = self.params.l,
            c = self.params.c,
            n,
            "building NSG graph"
        );

        self.init_enterpoint(storage, knn);
        let rows = self.link(storage, knn);

        let r = self.params.r;
        self.final_graph = vec![EMPTY_ID; n * r];
        let mut degrees = vec![0usize; n];
        for (q, row) in rows.into_iter().enumerate() {
            for (j, (_, id)) in row.iter().enumerate() {
                self.final_graph[q * r + j] = *id;
            }
            degrees[q] = row.len();
        }

        let attached = self.tree_grow(storage, &mut degrees);
        self.check_graph()?;
        self.is_built = true;

        tracing::debug!(attached, enterpoint = self.enterpoint, "NSG build complete");
        Ok(())
    }

    /// Stage 1: the entry point is the node nearest the centroid of all
    /// stored vectors, located by a greedy search over the seed graph from
    /// a random start.
    fn init_enterpoint(&mut self, storage: &dyn VectorStorage, knn: &KnnGraph) {
        let n = self.ntotal;
        let d = storage.dim();

        let mut center = vec![0.0f32; d];
        let mut tmp = vec![0.0f32; d];
        for i in 0..n as i32 {
            storage.reconstruct(i, &mut tmp);
            for (c, v) in center.iter_mut().zip(tmp.iter()) {
                *c += v;
            }
        }
        for c in center.iter_mut() {
            *c /= n as f32;
        }

        let mut dis = storage_distance_computer(storage);
        dis.set_query(&center);
        let seed = rand::thread_rng().gen_range(0..n) as i32;
        let mut vt = VisitedTable::new(n);
        let results = best_first_search(knn, &*dis, &[seed], self.params.l, &mut vt, None);
        self.enterpoint = results.first().map_or(seed, |&(_, id)| id);
    }

    /// Stage 2 + 3: per-node candidate pooling and pruning in parallel,
    /// then reverse-link installation under one mutex per node.
    fn link(&self, storage: &dyn VectorStorage, knn: &KnnGraph) -> Vec<Vec<(f32, i32)>> {
        let n = self.ntotal;
        let d = storage.dim();

        let pruned: Vec<Vec<(f32, i32)>> = (0..n as i32)
            .into_par_iter()
            .map_init(
                || {
                    (
                        VisitedTable::new(n),
                        storage_distance_computer(storage),
                        vec![0.0f32; d],
                    )
                },
                |(vt, dis, buf), q| {
                    storage.reconstruct(q, buf);
                    dis.set_query(buf);
                    self.sync_prune(q, &**dis, vt, knn)
                },
            )
            .collect();

        let rows: Vec<Mutex<Vec<(f32, i32)>>> = pruned.into_iter().map(Mutex::new).collect();
        (0..n as i32).into_par_iter().for_each_init(
            || storage_distance_computer(storage),
            |dis, q| add_reverse_links(q, &rows, &**dis, self.params.r),
        );

        rows.into_iter().map(|row| row.into_inner()).collect()
    }

    /// Candidate pool for node `q`: the full visited set of a width-`L`
    /// search over the seed graph, unioned with `q`'s own seed row, sorted
    /// by distance to `q`, capped at `C`, then pruned to `R` admits.
    fn sync_prune(
        &self,
        q: i32,
        dis: &dyn DistanceComputer,
        vt: &mut VisitedTable,
        knn: &KnnGraph,
    ) -> Vec<(f32, i32)> {
        let mut pool: Vec<(f32, i32)> = Vec::with_capacity(self.params.l * 2);
        best_first_search(
            knn,
            dis,
            &[self.enterpoint],
            self.params.l,
            vt,
            Some(&mut pool),
        );
        for &id in knn.row(q) {
            if id < 0 || id >= self.ntotal as i32 || id == q || vt.get(id) {
                continue;
            }
            pool.push((dis.distance(id), id));
        }
        vt.advance();

        pool.retain(|&(_, id)| id != q);
        pool.sort_unstable_by(cmp_dist_then_id);
        pool.truncate(self.params.c);
        prune_neighbors(dis, &pool, self.params.r)
    }

    /// Stage 4: DFS from the entry point; while unreached nodes remain,
    /// attach one to its nearest reachable node with spare degree and
    /// continue the DFS from there. Returns the number of attached nodes.
    fn tree_grow(&mut self, storage: &dyn VectorStorage, degrees: &mut [usize]) -> usize {
        let n = self.ntotal;
        let mut vt = VisitedTable::new(n);
        let mut vt2 = VisitedTable::new(n);

        let mut root = self.enterpoint;
        let mut cnt = 0usize;
        let mut attached = 0usize;
        loop {
            cnt = self.dfs(&mut vt, root, cnt);
            if cnt >= n {
                break;
            }
            root = self.attach_unlinked(storage, &mut vt, &mut vt2, degrees);
            vt2.advance();
            attached += 1;
        }
        attached
    }

    /// Iterative DFS over `final_graph`, counting newly reached nodes.
    fn dfs(&self, vt: &mut VisitedTable, root: i32, mut cnt: usize) -> usize {
        let mut stack = vec![root];
        if vt.insert(root) {
            cnt += 1;
        }

        while let Some(&node) = stack.last() {
            let mut next = EMPTY_ID;
            for &id in self.row(node) {
                if id == EMPTY_ID {
                    break;
                }
                if !vt.get(id) {
                    next = id;
                    break;
                }
            }
            if next == EMPTY_ID {
                stack.pop();
                continue;
            }
            vt.set(next);
            stack.push(next);
            cnt += 1;
        }
        cnt
    }

    /// Pick one unreached node and wire an edge into it from the nearest
    /// reached node whose degree is still below `R` (keeping the degree
    /// bound, unlike the paper's spanning-tree attach). Returns the node
    /// that received the edge.
    fn attach_unlinked(
        &mut self,
        storage: &dyn VectorStorage,
        vt: &mut VisitedTable,
        vt2: &mut VisitedTable,
        degrees: &mut [usize],
    ) -> i32 {
        let n = self.ntotal;
        let r = self.params.r;
        let id = match (0..n as i32).find(|&i| !vt.get(i)) {
            Some(i) => i,
            None => return EMPTY_ID,
        };

        let mut vec = vec![0.0f32; storage.dim()];
        storage.reconstruct(id, &mut vec);
        let mut dis = storage_distance_computer(storage);
        dis.set_query(&vec);

        let mut pool: Vec<(f32, i32)> = Vec::new();
        best_first_search(
            &*self,
            &*dis,
            &[self.enterpoint],
            self.params.search_l,
            vt2,
            Some(&mut pool),
        );
        pool.sort_unstable_by(cmp_dist_then_id);

        let mut node = pool
            .iter()
            .map(|&(_, p)| p)
            .find(|&p| p != id && degrees[p as usize] < r);
        if node.is_none() {
            // The searched region is saturated; take any reached node with
            // spare degree
            node = (0..n as i32).find(|&p| vt.get(p) && p != id && degrees[p as usize] < r);
        }

        match node {
            Some(node) => {
                let pos = degrees[node as usize];
                self.final_graph[node as usize * r + pos] = id;
                degrees[node as usize] += 1;
                node
            }
            None => {
                // Every reached node is at full degree: overwrite the last
                // slot of the nearest one so repair still terminates
                let node = pool.first().map_or(self.enterpoint, |&(_, p)| p);
                self.final_graph[node as usize * r + (r - 1)] = id;
                node
            }
        }
    }

    /// Validate that every adjacency entry is a node id or the sentinel.
    fn check_graph(&self) -> Result<()> {
        let n = self.ntotal as i32;
        for i in 0..n {
            for &id in self.row(i) {
                if id != EMPTY_ID && !(0..n).contains(&id) {
                    return Err(IndexError::CorruptGraph { node: i, id });
                }
            }
        }
        Ok(())
    }
}

/// Install reverse edges for `q`: every neighbor `des` of `q` gains the
/// edge `des → q`, re-pruned to `R` when the row overflows. One row lock is
/// held at a time.
fn add_reverse_links(
    q: i32,
    rows: &[Mutex<Vec<(f32, i32)>>],
    dis: &dyn DistanceComputer,
    r: usize,
) {
    let own_row = rows[q as usize].lock().clone();
    for &(d, des) in &own_row {
        let mut dest = rows[des as usize].lock();
        if dest.iter().any(|&(_, id)| id == q) {
            continue;
        }
        if dest.len() < r {
            dest.push((d, q));
            continue;
        }
        let mut pool = dest.clone();
        pool.push((d, q));
        pool.sort_unstable_by(cmp_dist_then_id);
        *dest = prune_neighbors(dis, &pool, r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knn::build_knn_graph;
    use crate::metric::Metric;
    use crate::nsg::graph::NsgParams;
    use crate::storage::FlatStorage;

    fn line_setup(n: usize) -> (FlatStorage, Vec<f32>) {
        let mut storage = FlatStorage::new(2, Metric::L2);
        let flat: Vec<f32> = (0..n).flat_map(|i| [i as f32, 0.0]).collect();
        storage.add(&flat).unwrap();
        (storage, flat)
    }

    fn reachable_count(g: &NsgGraph) -> usize {
        let mut vt = VisitedTable::new(g.len());
        g.dfs(&mut vt, g.enterpoint(), 0)
    }

    #[test]
    fn test_build_line_graph() {
        let (storage, flat) = line_setup(5);
        let knn = build_knn_graph(&storage, &flat, 3).unwrap();
        let mut g = NsgGraph::new(NsgParams::with_r(3));
        g.build(&storage, &knn).unwrap();

        assert!(g.is_built());
        // Medoid of a symmetric line is its middle point
        assert_eq!(g.enterpoint(), 2);
        for i in 0..5 {
            assert!(g.degree(i) <= 3);
            assert!(!g.row(i)[..g.degree(i)].contains(&i));
        }
        assert_eq!(reachable_count(&g), 5);
    }

    #[test]
    fn test_build_twice_fails() {
        let (storage, flat) = line_setup(5);
        let knn = build_knn_graph(&storage, &flat, 3).unwrap();
        let mut g = NsgGraph::new(NsgParams::with_r(3));
        g.build(&storage, &knn).unwrap();
        assert!(matches!(
            g.build(&storage, &knn),
            Err(IndexError::AlreadyBuilt)
        ));
    }

    #[test]
    fn test_tree_grow_repairs_unreachable_node() {
        // Node 4 sits far out on the x-axis, equidistant from the cluster
        // pair {0, 1}. Its only outgoing edge goes to 0, but 0's full row
        // contains 1, which ties 4's distance to 0 — so the pruning rule
        // rejects the reverse edge and 4 has no inbound edges before repair.
        let mut storage = FlatStorage::new(2, Metric::L2);
        let flat = [0.0, 1.0, 0.0, -1.0, 0.0, 3.1, 0.0, -3.1, 10.0, 0.0];
        storage.add(&flat).unwrap();
        let knn = build_knn_graph(&storage, &flat, 2).unwrap();
        // The seed graph itself has no edges into node 4
        for i in 0..4 {
            assert!(!knn.row(i).contains(&4));
        }

        let mut g = NsgGraph::new(NsgParams::with_r(2));
        g.build(&storage, &knn).unwrap();
        assert_eq!(reachable_count(&g), 5, "node 4 must be reattached");
        for i in 0..5 {
            assert!(g.degree(i) <= 2);
        }
    }

    #[test]
    fn test_single_node_graph() {
        let (storage, flat) = line_setup(1);
        let knn = build_knn_graph(&storage, &flat, 2).unwrap();
        let mut g = NsgGraph::new(NsgParams::with_r(2));
        g.build(&storage, &knn).unwrap();
        assert_eq!(g.enterpoint(), 0);
        assert_eq!(g.degree(0), 0);

        let mut dis = storage_distance_computer(&storage);
        dis.set_query(&[5.0, 5.0]);
        let mut vt = VisitedTable::new(1);
        let res = g.search(&*dis, 3, &mut vt);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].1, 0);
    }
}
