//! Offline ToureNPlaner (OffTP) graph file format.
//!
//! A block-paged, big-endian binary layout over a hierarchical spatial
//! grid keyed on CH level. Nodes live in fixed-capacity blocks chained
//! from base-grid cells up through coarser grids into the core; the
//! reader answers nearest-node queries by hopping along those chains
//! without ever loading the whole file.
//!
//! Sections (each padded to a 4096-byte page): header, node-geo blocks,
//! node-edge-range blocks, edge records, edge-detail records.

pub mod reader;
pub mod writer;

pub use self::reader::GraphFile;
pub use self::writer::OfftpFile;

use crate::formats::GraphData;
use crate::graph::GraphInData;
use crate::model::{GeoNode, OsmNode, Shortcut};

/// File magic, "CHGO" "ffTP".
pub const MAGIC0: u32 = 0x4348_474F;
pub const MAGIC1: u32 = 0x6666_5450;
pub const FORMAT_VERSION: u32 = 1;

/// Nodes per block. Must stay below the 10-bit slot space of the packed
/// node id, and block_size + 1 u32 pairs give a power-of-two stride.
pub const BLOCK_SIZE: u32 = 255;

pub const PAGE_SIZE: u64 = 4096;

/// `(level threshold, grid dimension)` per grid: nodes below the
/// threshold of entry `i` (and not below an earlier one) sort into an
/// `n × n` grid; nodes at or above the last threshold form the core.
/// Only the base grid is addressable from the header; coarser grids are
/// reached through block chains.
pub const GRID_LEVELS: [(u32, u32); 4] = [(5, 256), (10, 64), (20, 32), (40, 8)];

/// CH level at and above which a node belongs to the core.
pub const CORE_LEVEL: u32 = GRID_LEVELS[GRID_LEVELS.len() - 1].0;

/// Fixed-point factor: 1e-7 degrees per unit.
pub const COORD_SCALE: f64 = 1e7;

/// Node in native fixed-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Node {
    pub lat: i32,
    pub lon: i32,
}

impl Node {
    pub fn new(lat: f64, lon: f64) -> Node {
        Node {
            lat: (lat * COORD_SCALE).round() as i32,
            lon: (lon * COORD_SCALE).round() as i32,
        }
    }
}

impl From<OsmNode> for Node {
    fn from(n: OsmNode) -> Node {
        Node::new(n.lat, n.lon)
    }
}

impl From<GeoNode> for Node {
    fn from(n: GeoNode) -> Node {
        Node::new(n.lat, n.lon)
    }
}

/// Convert an ingested graph into the CH pipeline's types, deriving the
/// travel-time metric per edge.
pub fn prepare(data: GraphData) -> GraphInData<Node> {
    GraphInData {
        nodes: data.nodes.iter().map(|&n| Node::from(n)).collect(),
        edges: data.edges.iter().map(|&e| Shortcut::from(e)).collect(),
    }
}
