//! OffTP file reader: header parsing and nearest-node grid search.
//!
//! The reader keeps only the header in memory and answers `find_node`
//! by walking block chains on demand: start at the base cell under the
//! query, follow the chain up through the coarser grids into the core,
//! re-center on the best candidate, then probe the three neighbor cells
//! pulled toward the query.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Result};

use super::{FORMAT_VERSION, MAGIC0, MAGIC1, PAGE_SIZE};
use crate::model::{NodeId, NO_NID};

#[derive(Debug, Clone, Copy)]
struct Header {
    base_cell_x: i32,
    base_cell_y: i32,
    base_cell_width: i32,
    base_cell_height: i32,
    base_grid_width: u32,
    base_grid_height: u32,
    block_size: u32,
    block_count: u32,
    core_block_start: u32,
    edge_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NativeCoords {
    lon: i32,
    lat: i32,
}

impl NativeCoords {
    fn of(lon: f64, lat: f64) -> NativeCoords {
        NativeCoords {
            lon: (lon * super::COORD_SCALE).round() as i32,
            lat: (lat * super::COORD_SCALE).round() as i32,
        }
    }
}

/// Squared Euclidean distance in native units; monotonic with the true
/// distance at nearest-in-grid scale, so no reprojection is needed.
fn square_distance(a: NativeCoords, b: NativeCoords) -> u64 {
    let dlon = (a.lon as i64 - b.lon as i64).unsigned_abs();
    let dlat = (a.lat as i64 - b.lat as i64).unsigned_abs();
    (dlon * dlon).saturating_add(dlat * dlat)
}

#[derive(Debug, Clone, Copy)]
struct NodeGeo {
    id: NodeId,
    coords: NativeCoords,
}

/// An open OffTP file over any seekable source.
pub struct GraphFile<R: Read + Seek> {
    src: R,
    header: Header,
    stride: u64,
    offset_node_geo: u64,
}

impl<R: Read + Seek> GraphFile<R> {
    /// Parse and validate the header. Rejects anything that does not
    /// open with the expected magic and version.
    pub fn open(mut src: R) -> Result<GraphFile<R>> {
        let mut h = [0u32; 13];
        read_u32s(&mut src, 0, &mut h)?;

        if h[0] != MAGIC0 || h[1] != MAGIC1 {
            bail!("not an OffTP graph file (bad magic)");
        }
        if h[2] != FORMAT_VERSION {
            bail!("unsupported OffTP version {}", h[2]);
        }

        let header = Header {
            base_cell_x: h[3] as i32,
            base_cell_y: h[4] as i32,
            base_cell_width: h[5] as i32,
            base_cell_height: h[6] as i32,
            base_grid_width: h[7],
            base_grid_height: h[8],
            block_size: h[9],
            block_count: h[10],
            core_block_start: h[11],
            edge_count: h[12],
        };
        if header.base_cell_width <= 0 || header.base_cell_height <= 0 {
            bail!("corrupt OffTP header: non-positive cell size");
        }
        if header.base_grid_width == 0 || header.base_grid_height == 0 {
            bail!("corrupt OffTP header: empty base grid");
        }
        if header.block_size == 0 || header.block_size > 1023 {
            bail!(
                "corrupt OffTP header: block size {} outside the 10-bit slot space",
                header.block_size
            );
        }
        if header.base_grid_width as u64 * header.base_grid_height as u64
            > header.block_count as u64
        {
            bail!("corrupt OffTP header: base grid exceeds block count");
        }

        let stride = (header.block_size as u64 + 1) * 2 * 4;
        Ok(GraphFile {
            src,
            header,
            stride,
            offset_node_geo: PAGE_SIZE,
        })
    }

    pub fn block_count(&self) -> u32 {
        self.header.block_count
    }

    pub fn core_block_start(&self) -> u32 {
        self.header.core_block_start
    }

    pub fn edge_count(&self) -> u32 {
        self.header.edge_count
    }

    /// Section offsets derived from the header: node-geo, node-edges,
    /// edges, edge details.
    pub fn section_offsets(&self) -> (u64, u64, u64, u64) {
        let node_geo = self.offset_node_geo;
        let node_edges = align_page(node_geo + self.header.block_count as u64 * self.stride);
        let edges = align_page(node_edges + self.header.block_count as u64 * self.stride);
        let details = align_page(edges + self.header.edge_count as u64 * 8);
        (node_geo, node_edges, edges, details)
    }

    /// Nearest node to `(lon, lat)`, as a packed
    /// `(block << 10) | slot` id, or `u32::MAX` when the file holds no
    /// reachable node.
    pub fn find_node(&mut self, lon: f64, lat: f64) -> Result<NodeId> {
        let search = NativeCoords::of(lon, lat);

        let mut best: Option<NodeGeo> = None;
        let mut min_dist = u64::MAX;
        // shared across all chain walks: a block is scanned at most once
        let mut visited: HashSet<u32> = HashSet::new();

        loop {
            let last_id = best.map(|b| b.id);
            let center = best.map(|b| b.coords).unwrap_or(search);
            let (x, y) = self.grid_coords_for(center);
            self.scan_chain(
                y * self.header.base_grid_width + x,
                search,
                &mut visited,
                &mut best,
                &mut min_dist,
            )?;

            if best.map(|b| b.id) != last_id {
                // moved: restart centered on the new best
                continue;
            }

            let found = match best {
                Some(found) => found,
                None => {
                    // empty cell chain: seed the search with the first
                    // node of the core
                    match self.first_node_of_chain(self.header.core_block_start)? {
                        Some(node) => {
                            min_dist = square_distance(search, node.coords);
                            best = Some(node);
                            continue;
                        }
                        None => return Ok(NO_NID),
                    }
                }
            };

            // probe the neighbor cells in the direction pulling toward
            // the query; away from it everything is farther
            let nx = if search.lon < found.coords.lon && x > 0 {
                x - 1
            } else if search.lon > found.coords.lon && x + 1 < self.header.base_grid_width {
                x + 1
            } else {
                x
            };
            let ny = if search.lat < found.coords.lat && y > 0 {
                y - 1
            } else if search.lat > found.coords.lat && y + 1 < self.header.base_grid_height {
                y + 1
            } else {
                y
            };
            for (cx, cy) in [(x, ny), (nx, y), (nx, ny)] {
                self.scan_chain(
                    cy * self.header.base_grid_width + cx,
                    search,
                    &mut visited,
                    &mut best,
                    &mut min_dist,
                )?;
            }

            if best.map(|b| b.id) == last_id {
                return Ok(found.id);
            }
        }
    }

    /// Base grid cell containing a coordinate, clamped into the grid.
    fn grid_coords_for(&self, native: NativeCoords) -> (u32, u32) {
        let cell = |value: i32, base: i32, size: i32, dim: u32| -> u32 {
            let cell = if value >= base {
                ((value as i64 - base as i64) / size as i64) as u64
            } else {
                0
            };
            cell.min(dim as u64 - 1) as u32
        };
        (
            cell(
                native.lon,
                self.header.base_cell_x,
                self.header.base_cell_width,
                self.header.base_grid_width,
            ),
            cell(
                native.lat,
                self.header.base_cell_y,
                self.header.base_cell_height,
                self.header.base_grid_height,
            ),
        )
    }

    /// Walk the chain from `start_block`, folding every node into the
    /// running best. Stops at chain end, at an out-of-range block, or
    /// at a block seen before (cycle protection and cross-walk dedup).
    fn scan_chain(
        &mut self,
        start_block: u32,
        search: NativeCoords,
        visited: &mut HashSet<u32>,
        best: &mut Option<NodeGeo>,
        min_dist: &mut u64,
    ) -> Result<()> {
        let mut block = start_block;
        while block != u32::MAX && block < self.header.block_count {
            if !visited.insert(block) {
                break;
            }
            let (next, nodes) = self.read_block(block)?;
            for (slot, &coords) in nodes.iter().enumerate() {
                let d = square_distance(search, coords);
                if d < *min_dist {
                    *min_dist = d;
                    *best = Some(NodeGeo {
                        id: (block << 10) | slot as u32,
                        coords,
                    });
                }
            }
            block = next;
        }
        Ok(())
    }

    /// First node on the chain from `start_block`, skipping empty
    /// blocks. Independent of any running search.
    fn first_node_of_chain(&mut self, start_block: u32) -> Result<Option<NodeGeo>> {
        let mut visited = HashSet::new();
        let mut block = start_block;
        while block != u32::MAX && block < self.header.block_count {
            if !visited.insert(block) {
                break;
            }
            let (next, nodes) = self.read_block(block)?;
            if let Some(&coords) = nodes.first() {
                return Ok(Some(NodeGeo {
                    id: block << 10,
                    coords,
                }));
            }
            block = next;
        }
        Ok(None)
    }

    /// Read one node-geo block: the chain link plus the coordinates of
    /// its occupied slots, slot order preserved.
    fn read_block(&mut self, block: u32) -> Result<(u32, Vec<NativeCoords>)> {
        let offset = self.offset_node_geo + block as u64 * self.stride;
        let mut header = [0u32; 2];
        read_u32s(&mut self.src, offset, &mut header)?;
        let next = header[0];
        let count = header[1].min(self.header.block_size);

        let mut raw = vec![0u32; count as usize * 2];
        read_u32s(&mut self.src, offset + 8, &mut raw)?;
        let nodes = raw
            .chunks_exact(2)
            .map(|pair| NativeCoords {
                lon: pair[0] as i32,
                lat: pair[1] as i32,
            })
            .collect();
        Ok((next, nodes))
    }
}

fn align_page(offset: u64) -> u64 {
    (offset + (PAGE_SIZE - 1)) & !(PAGE_SIZE - 1)
}

/// Read `target.len()` big-endian u32 values at `offset`.
fn read_u32s<R: Read + Seek>(src: &mut R, offset: u64, target: &mut [u32]) -> Result<()> {
    if target.is_empty() {
        return Ok(());
    }
    src.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; target.len() * 4];
    src.read_exact(&mut buf)?;
    for (value, chunk) in target.iter_mut().zip(buf.chunks_exact(4)) {
        *value = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{writer::OfftpFile, Node};
    use super::*;
    use crate::graph::ChOutData;
    use crate::model::{Shortcut, NO_LVL};
    use std::io::Cursor;

    fn open(data: &ChOutData<Node>) -> GraphFile<Cursor<Vec<u8>>> {
        let mut buf = Vec::new();
        OfftpFile::write_to(&mut buf, data).unwrap();
        GraphFile::open(Cursor::new(buf)).unwrap()
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 8192];
        assert!(GraphFile::open(Cursor::new(buf)).is_err());
    }

    #[test]
    fn rejects_wrong_version() {
        let data = ChOutData {
            nodes: vec![],
            node_levels: vec![],
            edges: vec![],
        };
        let mut buf = Vec::new();
        OfftpFile::write_to(&mut buf, &data).unwrap();
        buf[11] = 2; // version word
        assert!(GraphFile::open(Cursor::new(buf)).is_err());
    }

    #[test]
    fn empty_graph_finds_nothing() {
        let mut file = open(&ChOutData {
            nodes: vec![],
            node_levels: vec![],
            edges: vec![],
        });
        assert_eq!(file.block_count(), 256 * 256);
        assert_eq!(file.edge_count(), 0);
        assert_eq!(file.find_node(0.0, 0.0).unwrap(), NO_NID);
    }

    #[test]
    fn section_offsets_are_page_aligned() {
        let file = open(&ChOutData {
            nodes: vec![Node::new(0.0, 0.0), Node::new(1.0, 1.0)],
            node_levels: vec![NO_LVL, NO_LVL],
            edges: vec![],
        });
        let (geo, node_edges, edges, details) = file.section_offsets();
        assert_eq!(geo, 4096);
        for offset in [node_edges, edges, details] {
            assert_eq!(offset % 4096, 0);
        }
        let stride = (255 + 1) * 2 * 4;
        assert_eq!(node_edges, align_page(4096 + file.block_count() as u64 * stride));
    }

    #[test]
    fn finds_exact_core_nodes() {
        let mut file = open(&ChOutData {
            nodes: vec![Node::new(0.0, 0.0), Node::new(1.0, 1.0)],
            node_levels: vec![NO_LVL, NO_LVL],
            edges: vec![],
        });
        let core = file.core_block_start();
        assert_eq!(file.find_node(0.0, 0.0).unwrap(), core << 10);
        assert_eq!(file.find_node(1.0, 1.0).unwrap(), (core << 10) | 1);
    }

    #[test]
    fn falls_back_through_the_core_for_empty_cells() {
        // a single core node far away from the queried cell
        let mut file = open(&ChOutData {
            nodes: vec![Node::new(1.0, 1.0)],
            node_levels: vec![NO_LVL],
            edges: vec![],
        });
        let core = file.core_block_start();
        assert_eq!(file.find_node(0.0, 0.0).unwrap(), core << 10);
    }

    #[test]
    fn nearest_node_in_a_cell_wins() {
        // two level-0 nodes share the base cell at the origin; a core
        // node far away fixes the grid extent
        let mut file = open(&ChOutData {
            nodes: vec![
                Node::new(0.0, 0.0),
                Node::new(0.0000001, 0.0000001),
                Node::new(1.0, 1.0),
            ],
            node_levels: vec![0, 0, NO_LVL],
            edges: vec![],
        });
        // both grid nodes sit in base cell 0, slots in fill order
        assert_eq!(file.find_node(0.0, 0.0).unwrap(), 0);
        assert_eq!(file.find_node(0.0000001, 0.0000001).unwrap(), 1);
    }

    #[test]
    fn shortcut_details_reference_stored_edges() {
        // chain 0 -> 1 -> 2 with node 1 contracted and a shortcut
        // bridging it; all stored edges must be resolvable
        let nodes = vec![Node::new(0.0, 0.0), Node::new(0.5, 0.5), Node::new(1.0, 1.0)];
        let node_levels = vec![NO_LVL, 0, NO_LVL];
        let edges = vec![
            Shortcut::plain(0, 0, 1, 5, 5),
            Shortcut::plain(1, 1, 2, 5, 5),
            Shortcut {
                id: 2,
                src: 0,
                tgt: 2,
                dist: 10,
                time: 10,
                child_edge1: 0,
                child_edge2: 1,
                center_node: 1,
            },
        ];
        let data = ChOutData {
            nodes,
            node_levels,
            edges,
        };
        let mut buf = Vec::new();
        OfftpFile::write_to(&mut buf, &data).unwrap();
        let mut file = GraphFile::open(Cursor::new(buf.clone())).unwrap();
        assert_eq!(file.edge_count(), 3);

        // decode section 5 by hand: each stored shortcut's children are
        // file edge ids below edge_count, and plain edges carry the
        // unset sentinel
        let (_, _, _, details) = file.section_offsets();
        let mut shortcut_seen = false;
        for k in 0..file.edge_count() as u64 {
            let record = details as usize + (k * 16) as usize;
            let child1 = u32::from_be_bytes(buf[record + 4..record + 8].try_into().unwrap());
            let child2 = u32::from_be_bytes(buf[record + 8..record + 12].try_into().unwrap());
            if child1 != u32::MAX {
                shortcut_seen = true;
                assert!(child1 < file.edge_count());
                assert!(child2 < file.edge_count());
            } else {
                assert_eq!(child2, u32::MAX);
            }
        }
        assert!(shortcut_seen);

        // the query side still resolves every node
        let packed = file.find_node(0.5, 0.5).unwrap();
        assert!(packed >> 10 < file.block_count());
    }
}
