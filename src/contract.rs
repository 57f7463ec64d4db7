//! Round-based node contraction.
//!
//! Each round selects an independent set of unimportant live nodes,
//! proposes shortcuts for the neighbor pairs whose shortest path really
//! runs through them, and applies the round to the store. A bounded
//! witness search (Dijkstra over the live graph) suppresses shortcuts
//! that an alternative path already covers.
//!
//! Contraction stops once `max_rounds` levels are assigned; the
//! remaining nodes keep their level unset and form the core.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use log::info;

use crate::model::{Direction, NodeId, Shortcut, NO_EID, NO_LVL};
use crate::ChGraph;

/// Settled-node cap for a single witness search. Keeps a round linear
/// in practice; an aborted search just means one extra shortcut.
const WITNESS_SETTLE_LIMIT: usize = 500;

/// One planned contraction round in the form the store applies.
#[derive(Debug, Clone)]
pub struct Round {
    pub deleted: Vec<NodeId>,
    pub to_delete: Vec<bool>,
    pub shortcuts: Vec<Shortcut>,
}

/// Contract `graph` for at most `max_rounds` rounds and return the
/// number of rounds applied. Nodes still live afterwards form the core.
pub fn contract<N>(graph: &mut ChGraph<N>, max_rounds: u32) -> u32 {
    let mut rounds = 0;
    while rounds < max_rounds {
        let Some(round) = plan_round(graph) else {
            break;
        };
        info!(
            "round {}: contracting {} nodes, {} candidate shortcuts",
            rounds,
            round.deleted.len(),
            round.shortcuts.len()
        );
        graph.restructure(&round.deleted, &round.to_delete, round.shortcuts);
        rounds += 1;
    }
    rounds
}

/// Plan the next round, or `None` when no live node remains.
pub fn plan_round<N>(graph: &ChGraph<N>) -> Option<Round> {
    let nr_nodes = graph.nr_nodes() as usize;
    let mut live: Vec<NodeId> = (0..graph.nr_nodes())
        .filter(|&n| graph.node_level(n) == NO_LVL)
        .collect();
    if live.is_empty() {
        return None;
    }

    // Cheapest nodes first: contract where few shortcuts are needed.
    live.sort_by_key(|&n| (edge_difference(graph, n), n));

    // Greedy independent set: a selected node blocks all its neighbors
    // for this round, so no edge ever loses both endpoints at once.
    let mut to_delete = vec![false; nr_nodes];
    let mut blocked = vec![false; nr_nodes];
    let mut deleted = Vec::new();
    for &node in &live {
        if blocked[node as usize] {
            continue;
        }
        to_delete[node as usize] = true;
        blocked[node as usize] = true;
        deleted.push(node);
        for dir in [Direction::Out, Direction::In] {
            for &e in graph.node_edges(node, dir) {
                blocked[graph.edge(e).other_node(dir) as usize] = true;
            }
        }
    }

    let mut shortcuts = Vec::new();
    for &node in &deleted {
        propose_shortcuts(graph, node, &to_delete, &mut shortcuts);
    }

    Some(Round {
        deleted,
        to_delete,
        shortcuts,
    })
}

/// Edge-difference priority: shortcuts the contraction would add minus
/// edges it removes. Lower contracts earlier.
fn edge_difference<N>(graph: &ChGraph<N>, node: NodeId) -> i64 {
    let ins = graph.node_edges(node, Direction::In);
    let outs = graph.node_edges(node, Direction::Out);
    let mut added = 0i64;
    for &e1 in ins {
        for &e2 in outs {
            if graph.edge(e1).src != graph.edge(e2).tgt {
                added += 1;
            }
        }
    }
    added - (ins.len() + outs.len()) as i64
}

/// Propose shortcuts for every in/out neighbor pair of `node` whose
/// shortest connection actually runs through it.
fn propose_shortcuts<N>(
    graph: &ChGraph<N>,
    node: NodeId,
    to_delete: &[bool],
    shortcuts: &mut Vec<Shortcut>,
) {
    let ins = graph.node_edges(node, Direction::In);
    let outs = graph.node_edges(node, Direction::Out);

    for &e1 in ins {
        let edge1 = *graph.edge(e1);
        debug_assert!(!to_delete[edge1.src as usize], "neighbor contracted with center");
        for &e2 in outs {
            let edge2 = *graph.edge(e2);
            if edge1.src == edge2.tgt {
                continue;
            }
            let dist = edge1.dist.saturating_add(edge2.dist);
            if has_witness(graph, edge1.src, edge2.tgt, node, to_delete, dist) {
                continue;
            }
            shortcuts.push(Shortcut {
                id: NO_EID,
                src: edge1.src,
                tgt: edge2.tgt,
                dist,
                time: edge1.time.saturating_add(edge2.time),
                child_edge1: edge1.id,
                child_edge2: edge2.id,
                center_node: node,
            });
        }
    }
}

/// Bounded Dijkstra from `src` toward `tgt` over live edges, avoiding
/// `via` and everything contracted this round. Returns true when an
/// alternative path no longer than `max_dist` exists.
fn has_witness<N>(
    graph: &ChGraph<N>,
    src: NodeId,
    tgt: NodeId,
    via: NodeId,
    to_delete: &[bool],
    max_dist: u32,
) -> bool {
    let mut dist: HashMap<NodeId, u32> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<(u32, NodeId)>> = BinaryHeap::new();
    dist.insert(src, 0);
    heap.push(Reverse((0, src)));

    let mut settled = 0;
    while let Some(Reverse((d, u))) = heap.pop() {
        if u == tgt {
            return true;
        }
        if d > *dist.get(&u).unwrap_or(&u32::MAX) {
            continue;
        }
        settled += 1;
        if settled > WITNESS_SETTLE_LIMIT {
            break;
        }
        for &e in graph.node_edges(u, Direction::Out) {
            let edge = graph.edge(e);
            let v = edge.tgt;
            if v == via || to_delete[v as usize] {
                continue;
            }
            let nd = d.saturating_add(edge.dist);
            if nd > max_dist {
                continue;
            }
            if nd < *dist.get(&v).unwrap_or(&u32::MAX) {
                dist.insert(v, nd);
                heap.push(Reverse((nd, v)));
            }
        }
    }
    false
}
