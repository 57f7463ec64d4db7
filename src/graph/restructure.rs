//! Application of one contraction round to the graph store.
//!
//! The round arrives fully decided from the contractor: which nodes go,
//! plus the candidate shortcuts bypassing them. This module merges the
//! candidates against the existing edge set and restores every store
//! invariant before returning. Precondition violations are programming
//! errors and are handled with assertions, not `Result`.

use log::debug;

use crate::model::{equal_endpoints, Direction, NodeId, Shortcut, NO_LVL, NO_NID};
use crate::ChGraph;

impl<N> ChGraph<N> {
    /// Apply one contraction round.
    ///
    /// * `deleted` — the nodes contracted in this round; they all
    ///   receive the current level, which then increments.
    /// * `to_delete` — the same set as a dense mask over all nodes.
    /// * `new_shortcuts` — candidate shortcuts whose `center_node` is
    ///   expected to be in the round.
    ///
    /// Candidates are deduplicated per endpoint pair (shortest wins,
    /// ties by input order) and merged against existing edges: an
    /// existing edge at least as short kills the candidate, an existing
    /// longer shortcut is overwritten in place, and surviving candidates
    /// are appended with fresh ids. Edges touching a contracted node
    /// leave both views but stay in the arena.
    pub fn restructure(
        &mut self,
        deleted: &[NodeId],
        to_delete: &[bool],
        new_shortcuts: Vec<Shortcut>,
    ) {
        assert_eq!(to_delete.len(), self.nodes.len());

        for &node in deleted {
            assert!(to_delete[node as usize]);
            debug_assert_eq!(self.node_levels[node as usize], NO_LVL, "level set twice");
            self.node_levels[node as usize] = self.next_level;
        }
        self.next_level += 1;

        // Only candidates whose center was actually contracted count;
        // the contractor may submit speculatively.
        let mut candidates = new_shortcuts;
        candidates.retain(|sc| {
            if !to_delete[sc.center_node as usize] {
                return false;
            }
            // src, tgt and center cannot fall in the same round
            assert!(!to_delete[sc.src as usize] && !to_delete[sc.tgt as usize]);
            true
        });

        // Out-edge order, shorter first; the dedupe keeps the first of
        // every equal-endpoint run.
        candidates.sort_by(|a, b| (a.src, a.tgt, a.dist).cmp(&(b.src, b.tgt, b.dist)));
        candidates.dedup_by(|cur, prev| equal_endpoints(cur, prev));

        let survivors = self.merge_candidates(candidates);

        // Drop contracted edges from the views only; the arena keeps
        // them so child references stay valid.
        let Self {
            edges,
            out_index,
            in_index,
            ..
        } = self;
        let stale = |e: &Shortcut| to_delete[e.src as usize] || to_delete[e.tgt as usize];
        out_index.erase_if(edges, stale);
        in_index.erase_if(edges, stale);

        let first_new = self.edges.len() as u32;
        for (i, mut sc) in survivors.into_iter().enumerate() {
            sc.id = first_new + i as u32;
            self.edges.push(sc);
        }

        debug!(
            "restructure: level {} for {} nodes, {} shortcuts appended",
            self.next_level - 1,
            deleted.len(),
            self.edges.len() as u32 - first_new
        );

        self.update();
    }

    /// Merge candidates against existing edges with the same endpoints.
    /// Returns the candidates to append.
    fn merge_candidates(&mut self, candidates: Vec<Shortcut>) -> Vec<Shortcut> {
        let mut survivors = Vec::with_capacity(candidates.len());

        for sc in candidates {
            // The out view of sc.src is sorted by (src, tgt); binary
            // search for the equal-endpoint run.
            let range = self.node_edges(sc.src, Direction::Out);
            let lo = range.partition_point(|&e| self.edges[e as usize].tgt < sc.tgt);
            let hi = range.partition_point(|&e| self.edges[e as usize].tgt <= sc.tgt);
            let matching: Vec<u32> = range[lo..hi].to_vec();

            // a strict improvement is required against every parallel edge
            if matching
                .iter()
                .any(|&pos| self.edges[pos as usize].dist <= sc.dist)
            {
                continue;
            }

            // every match is strictly longer: the candidate replaces one
            // of them in place, preferring an old shortcut slot. A live
            // edge is never a shortcut child (children always touch a
            // contracted center), so the slot content is free to go.
            let slot = matching
                .iter()
                .find(|&&pos| self.edges[pos as usize].center_node != NO_NID)
                .or_else(|| matching.first())
                .copied();
            match slot {
                Some(pos) => {
                    let id = self.edges[pos as usize].id;
                    self.edges[pos as usize] = Shortcut { id, ..sc };
                }
                None => survivors.push(sc),
            }
        }
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphInData;
    use crate::model::{Direction, NO_EID};

    fn shortcut(src: NodeId, tgt: NodeId, dist: u32, center: NodeId) -> Shortcut {
        Shortcut {
            id: NO_EID,
            src,
            tgt,
            dist,
            time: dist,
            child_edge1: 0,
            child_edge2: 1,
            center_node: center,
        }
    }

    fn graph(edges: Vec<Shortcut>) -> ChGraph<()> {
        let n = edges
            .iter()
            .map(|e| e.src.max(e.tgt) + 1)
            .max()
            .unwrap_or(0) as usize;
        ChGraph::init(GraphInData {
            nodes: vec![(); n],
            edges,
        })
    }

    #[test]
    fn empty_round_prunes_and_levels() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 10, 10),
            Shortcut::plain(NO_EID, 1, 0, 10, 10),
        ]);
        g.restructure(&[0], &[true, false], Vec::new());

        assert_eq!(g.node_level(0), 0);
        assert_eq!(g.node_level(1), NO_LVL);
        assert_eq!(g.next_level(), 1);
        assert_eq!(g.n_edges(0), 0);
        assert_eq!(g.n_edges(1), 0);
        // arena untouched
        assert_eq!(g.nr_edges(), 2);
    }

    #[test]
    fn rounds_assign_strictly_increasing_levels() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 1, 1),
            Shortcut::plain(NO_EID, 1, 2, 1, 1),
        ]);
        g.restructure(&[0], &[true, false, false], Vec::new());
        g.restructure(&[2], &[false, false, true], Vec::new());
        assert_eq!(g.node_level(0), 0);
        assert_eq!(g.node_level(2), 1);
        assert_eq!(g.next_level(), 2);
    }

    #[test]
    fn shortcut_replaces_longer_plain_edge_in_place() {
        // triangle: 0 -> 1 -> 2 plus a longer direct 0 -> 2
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
            Shortcut::plain(NO_EID, 0, 2, 11, 11),
        ]);
        g.restructure(&[1], &[false, true, false], vec![shortcut(0, 2, 10, 1)]);

        let out0 = g.node_edges(0, Direction::Out);
        assert_eq!(out0.len(), 1);
        let e = g.edge(out0[0]);
        assert_eq!((e.src, e.tgt, e.dist), (0, 2, 10));
        assert_eq!(e.center_node, 1);
        // replaced in the dominated edge's arena slot
        assert_eq!(e.id, 2);
        assert_eq!(g.nr_edges(), 3);
    }

    #[test]
    fn shortcut_overwrites_existing_shortcut() {
        // 0 -> 2 already holds a shortcut from an earlier round
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
            shortcut(0, 2, 11, 3),
            Shortcut::plain(NO_EID, 3, 1, 1, 1),
        ]);
        // fake the earlier round for node 3
        g.restructure(&[3], &[false, false, false, true], Vec::new());
        g.restructure(
            &[1],
            &[false, true, false, false],
            vec![shortcut(0, 2, 10, 1)],
        );

        let out0 = g.node_edges(0, Direction::Out);
        assert_eq!(out0.len(), 1);
        let e = g.edge(out0[0]);
        assert_eq!((e.src, e.tgt, e.dist), (0, 2, 10));
        assert_eq!(e.center_node, 1);
        // overwritten in place: same arena slot, same id
        assert_eq!(e.id, 2);
        assert_eq!(g.nr_edges(), 4);
    }

    #[test]
    fn shortcut_loses_to_shorter_existing_edge() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
            Shortcut::plain(NO_EID, 0, 2, 8, 8),
        ]);
        g.restructure(&[1], &[false, true, false], vec![shortcut(0, 2, 10, 1)]);

        let out0 = g.node_edges(0, Direction::Out);
        assert_eq!(out0.len(), 1);
        let e = g.edge(out0[0]);
        assert_eq!(e.dist, 8);
        assert!(!e.is_shortcut());
        assert_eq!(g.nr_edges(), 3);
    }

    #[test]
    fn equal_distance_is_not_an_improvement() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
            Shortcut::plain(NO_EID, 0, 2, 10, 10),
        ]);
        g.restructure(&[1], &[false, true, false], vec![shortcut(0, 2, 10, 1)]);

        let out0 = g.node_edges(0, Direction::Out);
        assert_eq!(out0.len(), 1);
        assert!(!g.edge(out0[0]).is_shortcut());
    }

    #[test]
    fn duplicate_candidates_keep_only_shortest() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
        ]);
        g.restructure(
            &[1],
            &[false, true, false],
            vec![shortcut(0, 2, 12, 1), shortcut(0, 2, 10, 1)],
        );

        let out0 = g.node_edges(0, Direction::Out);
        assert_eq!(out0.len(), 1);
        assert_eq!(g.edge(out0[0]).dist, 10);
        assert_eq!(g.nr_edges(), 3);
    }

    #[test]
    fn candidate_with_foreign_center_is_ignored() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
        ]);
        // center 0 is not part of the round
        g.restructure(&[1], &[false, true, false], vec![shortcut(0, 2, 10, 0)]);
        assert_eq!(g.nr_edges(), 2);
        assert_eq!(g.n_edges(0), 0);
    }

    #[test]
    fn no_live_edge_touches_contracted_nodes() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 1, 1),
            Shortcut::plain(NO_EID, 1, 2, 1, 1),
            Shortcut::plain(NO_EID, 2, 3, 1, 1),
            Shortcut::plain(NO_EID, 3, 0, 1, 1),
        ]);
        let to_delete = vec![true, false, true, false];
        g.restructure(
            &[0, 2],
            &to_delete,
            vec![shortcut(3, 1, 2, 0), shortcut(1, 3, 2, 2)],
        );

        for node in 0..g.nr_nodes() {
            for dir in [Direction::Out, Direction::In] {
                for &e in g.node_edges(node, dir) {
                    let edge = g.edge(e);
                    assert!(!to_delete[edge.src as usize]);
                    assert!(!to_delete[edge.tgt as usize]);
                }
            }
        }
        // both shortcuts appended with fresh dense ids
        assert_eq!(g.nr_edges(), 6);
        assert_eq!(g.edge(4).id, 4);
        assert_eq!(g.edge(5).id, 5);
    }

    #[test]
    fn appended_shortcut_endpoints_are_uncontracted() {
        let mut g = graph(vec![
            Shortcut::plain(NO_EID, 0, 1, 5, 5),
            Shortcut::plain(NO_EID, 1, 2, 5, 5),
        ]);
        g.restructure(&[1], &[false, true, false], vec![shortcut(0, 2, 10, 1)]);
        let out0 = g.node_edges(0, Direction::Out);
        let sc = g.edge(out0[0]);
        assert_eq!(g.node_level(sc.src), NO_LVL);
        assert_eq!(g.node_level(sc.tgt), NO_LVL);
        assert!(sc.is_shortcut());
        assert_ne!(sc.child_edge1, NO_EID);
        assert_ne!(sc.child_edge2, NO_EID);
    }
}
