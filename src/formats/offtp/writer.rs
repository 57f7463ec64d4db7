//! OffTP file writer.
//!
//! Lays a contracted graph out in five page-aligned sections: header,
//! node-geo blocks, node-edge-range blocks, edges, edge details. Nodes
//! are binned into the spatial grid matching their CH level, in
//! level-ascending order, so that every base cell's block chain leads
//! upward through the coarser grids and ends in the core.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Result};
use log::debug;

use super::{Node, BLOCK_SIZE, CORE_LEVEL, FORMAT_VERSION, GRID_LEVELS, MAGIC0, MAGIC1, PAGE_SIZE};
use crate::graph::ChOutData;
use crate::model::{NodeId, Shortcut, NO_EID, NO_NID};

/// Grid level of the core chain.
const CORE_GRID: u32 = u32::MAX;

pub struct OfftpFile;

impl OfftpFile {
    /// Write a contracted graph as an OffTP file.
    pub fn write<P: AsRef<Path>>(path: P, data: &ChOutData<Node>) -> Result<()> {
        let file = File::create(path)?;
        Self::write_to(BufWriter::new(file), data)
    }

    /// Write to any sink; used for in-memory round trips.
    pub fn write_to<W: Write>(out: W, data: &ChOutData<Node>) -> Result<()> {
        assert_eq!(data.nodes.len(), data.node_levels.len());
        let mut layout = Layout::new(&data.nodes, &data.node_levels, &data.edges);
        layout.calc_bounds();
        layout.prepare_cell_blocks();
        layout.fill_blocks()?;
        layout.count_and_sort_edges();
        layout.serialize(out)
    }
}

/// One fixed-capacity node container. `base_x`/`base_y`/`level`
/// identify the grid cell the block belongs to; they never reach the
/// file and only guard chain consistency.
struct Block {
    base_x: i32,
    base_y: i32,
    level: u32,
    next: u32,
    nodes: Vec<NodeId>,
}

struct Layout<'a> {
    nodes: &'a [Node],
    node_levels: &'a [u32],
    edges: &'a [Shortcut],

    min_lon: i32,
    min_lat: i32,
    max_lon: i32,
    max_lat: i32,
    base_cell_x: i32,
    base_cell_y: i32,
    base_cell_width: i32,
    base_cell_height: i32,

    blocks: Vec<Block>,
    /// Head block per grid cell, all grids concatenated; `u32::MAX`
    /// marks a cell without one.
    cell_blocks: Vec<u32>,
    core_block_start: u32,
    /// Packed `(block << 10) | slot` id per original node index.
    node_block_ids: Vec<u32>,

    node_first_out: Vec<u32>,
    node_first_in: Vec<u32>,
    node_end_edge: Vec<u32>,
    /// File edge id -> original edge index.
    use_edges: Vec<u32>,
    /// Original edge index -> file edge id, `u32::MAX` when dropped.
    edges_reverse: Vec<u32>,
}

/// Where an edge record is stored, if at all.
enum Placement {
    OutAt(NodeId),
    InAt(NodeId),
    Dropped,
}

impl<'a> Layout<'a> {
    fn new(nodes: &'a [Node], node_levels: &'a [u32], edges: &'a [Shortcut]) -> Layout<'a> {
        Layout {
            nodes,
            node_levels,
            edges,
            min_lon: 0,
            min_lat: 0,
            max_lon: 0,
            max_lat: 0,
            base_cell_x: 0,
            base_cell_y: 0,
            base_cell_width: 0,
            base_cell_height: 0,
            blocks: Vec::new(),
            cell_blocks: Vec::new(),
            core_block_start: u32::MAX,
            node_block_ids: Vec::new(),
            node_first_out: Vec::new(),
            node_first_in: Vec::new(),
            node_end_edge: Vec::new(),
            use_edges: Vec::new(),
            edges_reverse: Vec::new(),
        }
    }

    fn calc_bounds(&mut self) {
        if self.nodes.is_empty() {
            // keep the header well-formed for an empty graph
            return;
        }
        self.min_lon = i32::MAX;
        self.min_lat = i32::MAX;
        self.max_lon = i32::MIN;
        self.max_lat = i32::MIN;
        for node in self.nodes {
            self.min_lon = self.min_lon.min(node.lon);
            self.max_lon = self.max_lon.max(node.lon);
            self.min_lat = self.min_lat.min(node.lat);
            self.max_lat = self.max_lat.max(node.lat);
        }
        debug!(
            "bounds: {} x {}",
            self.max_lon as i64 - self.min_lon as i64,
            self.max_lat as i64 - self.min_lat as i64
        );
    }

    fn create_block(&mut self, base_x: i32, base_y: i32, level: u32) -> u32 {
        let ndx = self.blocks.len() as u32;
        self.blocks.push(Block {
            base_x,
            base_y,
            level,
            next: u32::MAX,
            nodes: Vec::new(),
        });
        ndx
    }

    /// Pre-allocate one block per base cell so that the block index
    /// equals the cell index `y * grid_width + x`. The reader relies on
    /// this to address base cells directly.
    fn prepare_cell_blocks(&mut self) {
        self.base_cell_x = self.min_lon - 1;
        self.base_cell_y = self.min_lat - 1;

        let n = GRID_LEVELS[0].1;
        self.base_cell_width =
            ((self.max_lon as i64 - self.min_lon as i64) / n as i64 + 1) as i32;
        self.base_cell_height =
            ((self.max_lat as i64 - self.min_lat as i64) / n as i64 + 1) as i32;
        debug!(
            "base cell size: {} x {}",
            self.base_cell_width, self.base_cell_height
        );

        let cell_count: usize = GRID_LEVELS.iter().map(|&(_, n)| (n * n) as usize).sum();
        self.cell_blocks = vec![u32::MAX; cell_count];

        for y in 0..n {
            for x in 0..n {
                let base_x = self.grid_base_x(0, x);
                let base_y = self.grid_base_y(0, y);
                let ndx = self.create_block(base_x, base_y, 0);
                let cell = (y * n + x) as usize;
                self.cell_blocks[cell] = ndx;
                debug_assert_eq!(cell as u32, ndx);
            }
        }
    }

    /// Base-grid column of an x coordinate, clamped into the grid.
    fn base_grid_x(&self, x: i32) -> i64 {
        let n = GRID_LEVELS[0].1 as i64;
        ((x as i64 - self.base_cell_x as i64) / self.base_cell_width as i64).clamp(0, n - 1)
    }

    fn base_grid_y(&self, y: i32) -> i64 {
        let n = GRID_LEVELS[0].1 as i64;
        ((y as i64 - self.base_cell_y as i64) / self.base_cell_height as i64).clamp(0, n - 1)
    }

    /// Cell column in grid `level` of an x coordinate.
    fn grid_x(&self, level: usize, x: i32) -> u32 {
        let n0 = GRID_LEVELS[0].1 as i64;
        ((self.base_grid_x(x) * GRID_LEVELS[level].1 as i64) / n0) as u32
    }

    fn grid_y(&self, level: usize, y: i32) -> u32 {
        let n0 = GRID_LEVELS[0].1 as i64;
        ((self.base_grid_y(y) * GRID_LEVELS[level].1 as i64) / n0) as u32
    }

    /// Cell index within grid `level`.
    fn local_grid_offset(&self, level: usize, x: i32, y: i32) -> usize {
        (self.grid_y(level, y) * GRID_LEVELS[level].1 + self.grid_x(level, x)) as usize
    }

    /// Cell index into the concatenated `cell_blocks` array.
    fn grid_offset(&self, level: usize, x: i32, y: i32) -> usize {
        let skipped: usize = GRID_LEVELS[..level]
            .iter()
            .map(|&(_, n)| (n * n) as usize)
            .sum();
        skipped + self.local_grid_offset(level, x, y)
    }

    /// West edge of a grid cell, in native units. Wrapping keeps the
    /// value a plain chain-consistency tag even at world-spanning
    /// extents; it is never written to the file.
    fn grid_base_x(&self, level: usize, cell_x: u32) -> i32 {
        let base_cell_x = cell_x * (GRID_LEVELS[0].1 / GRID_LEVELS[level].1);
        (self.base_cell_x as i64 + self.base_cell_width as i64 * base_cell_x as i64) as i32
    }

    fn grid_base_y(&self, level: usize, cell_y: u32) -> i32 {
        let base_cell_y = cell_y * (GRID_LEVELS[0].1 / GRID_LEVELS[level].1);
        (self.base_cell_y as i64 + self.base_cell_height as i64 * base_cell_y as i64) as i32
    }

    /// Last block of the chain starting at `block` that still belongs
    /// to the same grid cell.
    fn same_level_last_block(&self, mut block: u32) -> u32 {
        if block == u32::MAX {
            return block;
        }
        loop {
            let b = &self.blocks[block as usize];
            let next = b.next;
            if next == u32::MAX {
                return block;
            }
            let nb = &self.blocks[next as usize];
            assert!(
                nb.base_x == b.base_x && nb.base_y == b.base_y && nb.level == b.level,
                "block chain crosses grid cells"
            );
            block = next;
        }
    }

    /// Absolute end of the chain rooted at a base cell.
    fn find_base_cell_last_block(&self, x: i32, y: i32) -> u32 {
        let mut block = self.cell_blocks[self.local_grid_offset(0, x, y)];
        debug_assert_ne!(block, u32::MAX);
        loop {
            let next = self.blocks[block as usize].next;
            if next == u32::MAX {
                return block;
            }
            block = next;
        }
    }

    /// Append `node` to the chain headed by `block`, extending it when
    /// full. Returns the packed node id.
    fn block_add_node(&mut self, node: NodeId, block: u32) -> u32 {
        let mut block = self.same_level_last_block(block);
        if self.blocks[block as usize].nodes.len() >= BLOCK_SIZE as usize {
            let old = block;
            debug_assert_eq!(self.blocks[old as usize].next, u32::MAX);
            let (base_x, base_y, level) = {
                let b = &self.blocks[old as usize];
                (b.base_x, b.base_y, b.level)
            };
            block = self.create_block(base_x, base_y, level);
            self.blocks[old as usize].next = block;
        }
        let slot = self.blocks[block as usize].nodes.len() as u32;
        self.blocks[block as usize].nodes.push(node);
        let packed = (block << 10) | slot;
        debug_assert!((packed >> 10) < self.blocks.len() as u32);
        debug_assert!((packed & 1023) < BLOCK_SIZE);
        packed
    }

    /// Sort one node into the grid. Must be called in ascending CH
    /// level order.
    fn blocks_add_node(&mut self, node: NodeId, cur_grid: &mut u32) -> Result<u32> {
        let x = self.nodes[node as usize].lon;
        let y = self.nodes[node as usize].lat;
        let rank = self.node_levels[node as usize];

        let grid = GRID_LEVELS
            .iter()
            .position(|&(threshold, _)| threshold > rank)
            .map(|i| i as u32)
            .unwrap_or(CORE_GRID);

        if *cur_grid < grid {
            debug!("entering grid level {grid}: {} blocks in use", self.blocks.len());
            *cur_grid = grid;
        } else if *cur_grid != grid {
            bail!("nodes not in CH level ascending order");
        }

        let block = if grid != CORE_GRID {
            let cell = self.grid_offset(grid as usize, x, y);
            match self.cell_blocks[cell] {
                u32::MAX => {
                    debug_assert!(grid > 0, "base grid is pre-allocated");
                    let head = self.create_block(
                        self.grid_base_x(grid as usize, self.grid_x(grid as usize, x)),
                        self.grid_base_y(grid as usize, self.grid_y(grid as usize, y)),
                        grid,
                    );
                    self.cell_blocks[cell] = head;
                    head
                }
                head => head,
            }
        } else {
            if self.core_block_start == u32::MAX {
                self.core_block_start =
                    self.create_block(self.base_cell_x, self.base_cell_y, CORE_GRID);
            }
            self.core_block_start
        };

        if grid > 0 {
            // above the base grid: the base cell chain must lead here
            let old = self.find_base_cell_last_block(x, y);
            if old < block {
                debug_assert_eq!(self.blocks[old as usize].next, u32::MAX);
                self.blocks[old as usize].next = block;
            } else {
                debug_assert_eq!(old, self.same_level_last_block(block));
            }
        }

        Ok(self.block_add_node(node, block))
    }

    /// Bin all nodes, level-ascending.
    fn fill_blocks(&mut self) -> Result<()> {
        let mut order: Vec<NodeId> = (0..self.nodes.len() as NodeId).collect();
        order.sort_by_key(|&n| self.node_levels[n as usize]);

        self.node_block_ids = vec![u32::MAX; self.nodes.len()];
        let mut cur_grid = 0u32;
        for node in order {
            let packed = self.blocks_add_node(node, &mut cur_grid)?;
            self.node_block_ids[node as usize] = packed;
        }
        debug!(
            "{} blocks in use for {} nodes",
            self.blocks.len(),
            self.nodes.len()
        );
        Ok(())
    }

    fn classify(&self, edge: &Shortcut) -> Placement {
        let srank = self.node_levels[edge.src as usize];
        let trank = self.node_levels[edge.tgt as usize];
        if srank >= CORE_LEVEL && trank >= CORE_LEVEL {
            // core edges always live at the source; core-internal
            // shortcuts are reconstructible and not stored
            if edge.center_node == NO_NID
                || self.node_levels[edge.center_node as usize] < CORE_LEVEL
            {
                Placement::OutAt(edge.src)
            } else {
                Placement::Dropped
            }
        } else {
            assert_ne!(
                srank, trank,
                "edge {} endpoints share CH level {}",
                edge.id, srank
            );
            if srank < trank {
                Placement::OutAt(edge.src)
            } else {
                Placement::InAt(edge.tgt)
            }
        }
    }

    /// Count stored edges per node, assign dense file edge ids in block
    /// order, and build the id mapping in both directions.
    fn count_and_sort_edges(&mut self) {
        let nr_nodes = self.nodes.len();
        self.node_first_out = vec![0; nr_nodes];
        self.node_first_in = vec![0; nr_nodes];
        self.node_end_edge = vec![0; nr_nodes];

        let mut stored = 0usize;
        for edge in self.edges {
            match self.classify(edge) {
                Placement::OutAt(n) => {
                    self.node_first_out[n as usize] += 1;
                    stored += 1;
                }
                Placement::InAt(n) => {
                    self.node_first_in[n as usize] += 1;
                    stored += 1;
                }
                Placement::Dropped => {}
            }
        }

        // turn the counts into first-ids, visiting nodes in block order
        // so the file ids come out dense and grouped per block
        let mut next_out = vec![0u32; nr_nodes];
        let mut next_in = vec![0u32; nr_nodes];
        let mut next_edge_id = 0u32;
        for block in &self.blocks {
            debug_assert!(block.nodes.len() <= BLOCK_SIZE as usize);
            for &n in &block.nodes {
                let n = n as usize;
                let first = next_edge_id;
                next_edge_id += self.node_first_out[n];
                next_out[n] = first;
                self.node_first_out[n] = first;

                let first = next_edge_id;
                next_edge_id += self.node_first_in[n];
                next_in[n] = first;
                self.node_first_in[n] = first;

                self.node_end_edge[n] = next_edge_id;
            }
        }

        self.use_edges = vec![u32::MAX; stored];
        self.edges_reverse = vec![u32::MAX; self.edges.len()];
        for (ndx, edge) in self.edges.iter().enumerate() {
            let slot = match self.classify(edge) {
                Placement::OutAt(n) => {
                    let k = next_out[n as usize];
                    next_out[n as usize] += 1;
                    Some(k)
                }
                Placement::InAt(n) => {
                    let k = next_in[n as usize];
                    next_in[n as usize] += 1;
                    Some(k)
                }
                Placement::Dropped => None,
            };
            if let Some(k) = slot {
                self.use_edges[k as usize] = ndx as u32;
                self.edges_reverse[ndx] = k;
            }
        }
    }

    fn serialize<W: Write>(&self, out: W) -> Result<()> {
        let mut sink = Sink::new(out);

        // 1. header
        sink.put_u32(MAGIC0)?;
        sink.put_u32(MAGIC1)?;
        sink.put_u32(FORMAT_VERSION)?;
        sink.put_i32(self.base_cell_x)?;
        sink.put_i32(self.base_cell_y)?;
        sink.put_i32(self.base_cell_width)?;
        sink.put_i32(self.base_cell_height)?;
        sink.put_u32(GRID_LEVELS[0].1)?;
        sink.put_u32(GRID_LEVELS[0].1)?;
        sink.put_u32(BLOCK_SIZE)?;
        sink.put_u32(self.blocks.len() as u32)?;
        sink.put_u32(self.core_block_start)?;
        sink.put_u32(self.use_edges.len() as u32)?;
        sink.align_page()?;

        // 2. node geo blocks
        for block in &self.blocks {
            sink.put_u32(block.next)?;
            sink.put_u32(block.nodes.len() as u32)?;
            for slot in 0..BLOCK_SIZE as usize {
                match block.nodes.get(slot) {
                    Some(&n) => {
                        sink.put_i32(self.nodes[n as usize].lon)?;
                        sink.put_i32(self.nodes[n as usize].lat)?;
                    }
                    None => {
                        sink.put_u32(0)?;
                        sink.put_u32(0)?;
                    }
                }
            }
        }
        sink.align_page()?;

        // 3. node edge-range blocks; empty slots carry the running end
        // id so their ranges come out empty
        let mut current_end = 0u32;
        for block in &self.blocks {
            sink.put_u32(0)?;
            for slot in 0..BLOCK_SIZE as usize {
                match block.nodes.get(slot) {
                    Some(&n) => {
                        sink.put_u32(self.node_first_out[n as usize])?;
                        sink.put_u32(self.node_first_in[n as usize])?;
                        current_end = self.node_end_edge[n as usize];
                    }
                    None => {
                        sink.put_u32(current_end)?;
                        sink.put_u32(current_end)?;
                    }
                }
            }
            sink.put_u32(current_end)?;
        }
        sink.align_page()?;

        // 4. edges: target in "CH up" direction, or the core target
        for &ndx in &self.use_edges {
            let edge = &self.edges[ndx as usize];
            let srank = self.node_levels[edge.src as usize];
            let trank = self.node_levels[edge.tgt as usize];
            if srank < trank || trank >= CORE_LEVEL {
                sink.put_u32(self.node_block_ids[edge.tgt as usize])?;
            } else {
                sink.put_u32(self.node_block_ids[edge.src as usize])?;
            }
            sink.put_u32(edge.time)?;
        }
        sink.align_page()?;

        // 5. edge details
        for &ndx in &self.use_edges {
            let edge = &self.edges[ndx as usize];
            sink.put_u32(edge.dist)?;
            debug_assert_eq!(edge.child_edge1 == NO_EID, edge.child_edge2 == NO_EID);
            if edge.child_edge1 == NO_EID {
                sink.put_u32(u32::MAX)?;
                sink.put_u32(u32::MAX)?;
                sink.put_u32(u32::MAX)?;
            } else {
                let child1 = self.edges_reverse[edge.child_edge1 as usize];
                let child2 = self.edges_reverse[edge.child_edge2 as usize];
                assert!(
                    child1 != u32::MAX && child2 != u32::MAX,
                    "shortcut child of edge {} was dropped",
                    edge.id
                );
                debug_assert_ne!(edge.center_node, NO_NID);
                sink.put_u32(child1)?;
                sink.put_u32(child2)?;
                sink.put_u32(self.node_block_ids[edge.center_node as usize])?;
            }
        }

        sink.finish()
    }
}

/// Counting big-endian writer with page alignment.
struct Sink<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> Sink<W> {
    fn new(out: W) -> Sink<W> {
        Sink { out, written: 0 }
    }

    fn put_u32(&mut self, value: u32) -> Result<()> {
        self.out.write_all(&value.to_be_bytes())?;
        self.written += 4;
        Ok(())
    }

    fn put_i32(&mut self, value: i32) -> Result<()> {
        self.put_u32(value as u32)
    }

    /// Zero-pad to the next page boundary.
    fn align_page(&mut self) -> Result<()> {
        let tail = self.written % PAGE_SIZE;
        if tail == 0 {
            return Ok(());
        }
        let padding = [0u8; PAGE_SIZE as usize];
        self.out.write_all(&padding[..(PAGE_SIZE - tail) as usize])?;
        self.written += PAGE_SIZE - tail;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
