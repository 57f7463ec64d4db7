//! Sorted permutation views over the shared edge arena.
//!
//! An [`EdgeIndex`] stores edge positions, never edge data; the arena it
//! refers to is passed into every operation. Two total orders exist:
//! by `(src, tgt)` for the outgoing view and by `(tgt, src)` for the
//! incoming view. Equal-key runs are allowed (the store is a multigraph).

use std::cmp::Ordering;

use crate::model::{EdgeId, Shortcut};

/// `(src, tgt)` ascending.
pub fn out_edge_order(a: &Shortcut, b: &Shortcut) -> Ordering {
    (a.src, a.tgt).cmp(&(b.src, b.tgt))
}

/// `(tgt, src)` ascending.
pub fn in_edge_order(a: &Shortcut, b: &Shortcut) -> Ordering {
    (a.tgt, a.src).cmp(&(b.tgt, b.src))
}

/// A permutation of edge positions, kept sorted by one of the orders
/// above. Edges leave the view via [`erase_if`](EdgeIndex::erase_if)
/// while staying in the arena.
#[derive(Debug, Default, Clone)]
pub struct EdgeIndex {
    indices: Vec<EdgeId>,
    /// Arena length at the last sync; positions below this have been
    /// offered to the view already and are not re-added.
    synced: usize,
}

impl EdgeIndex {
    /// Add all arena positions not yet seen by this view, then sort.
    /// On a fresh index this makes the view the full `[0, |edges|)`.
    pub fn sync_sorted<F>(&mut self, edges: &[Shortcut], order: F)
    where
        F: Fn(&Shortcut, &Shortcut) -> Ordering,
    {
        for pos in self.synced..edges.len() {
            self.indices.push(pos as EdgeId);
        }
        self.synced = edges.len();
        self.indices
            .sort_by(|&a, &b| order(&edges[a as usize], &edges[b as usize]));
    }

    /// Reset the view to the full arena `[0, |edges|)` and sort,
    /// resurrecting previously erased positions.
    pub fn reset_sorted<F>(&mut self, edges: &[Shortcut], order: F)
    where
        F: Fn(&Shortcut, &Shortcut) -> Ordering,
    {
        self.indices = (0..edges.len() as EdgeId).collect();
        self.synced = edges.len();
        self.indices
            .sort_by(|&a, &b| order(&edges[a as usize], &edges[b as usize]));
    }

    /// Remove positions whose edges satisfy `pred`, preserving order.
    pub fn erase_if<F>(&mut self, edges: &[Shortcut], pred: F)
    where
        F: Fn(&Shortcut) -> bool,
    {
        self.indices.retain(|&pos| !pred(&edges[pos as usize]));
    }

    pub fn as_slice(&self) -> &[EdgeId] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
