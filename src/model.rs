//! Core value types shared by the graph store and the file formats.
//!
//! Node and edge ids are dense `u32` indices into the owning arenas;
//! `u32::MAX` doubles as the "unset" sentinel throughout.

use std::ops::Not;

pub type NodeId = u32;
pub type EdgeId = u32;

pub const NO_NID: NodeId = u32::MAX;
pub const NO_EID: EdgeId = u32::MAX;
pub const NO_DIST: u32 = u32::MAX;
pub const NO_LVL: u32 = u32::MAX;

/// Edge traversal direction: `Out` follows an edge from its source,
/// `In` arrives at its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Not for Direction {
    type Output = Direction;

    fn not(self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
        }
    }
}

/// Minimal node: identity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
}

/// Minimal directed edge with a distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub tgt: NodeId,
    pub dist: u32,
}

/// Node as produced by OSM-derived graph files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsmNode {
    pub id: NodeId,
    pub osm_id: u32,
    pub lat: f64,
    pub lon: f64,
    pub elev: i32,
}

/// Node with geographic position but no external id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoNode {
    pub id: NodeId,
    pub lat: f64,
    pub lon: f64,
    pub elev: i32,
}

/// Edge as produced by OSM-derived graph files. `speed <= 0` means the
/// travel speed is derived from the road type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsmEdge {
    pub id: EdgeId,
    pub src: NodeId,
    pub tgt: NodeId,
    pub dist: u32,
    pub road_type: u32,
    pub speed: i32,
}

impl From<OsmNode> for Node {
    fn from(n: OsmNode) -> Node {
        Node { id: n.id }
    }
}

impl From<GeoNode> for Node {
    fn from(n: GeoNode) -> Node {
        Node { id: n.id }
    }
}

impl From<OsmNode> for GeoNode {
    fn from(n: OsmNode) -> GeoNode {
        GeoNode {
            id: n.id,
            lat: n.lat,
            lon: n.lon,
            elev: n.elev,
        }
    }
}

impl From<GeoNode> for OsmNode {
    fn from(n: GeoNode) -> OsmNode {
        OsmNode {
            id: n.id,
            osm_id: 0,
            lat: n.lat,
            lon: n.lon,
            elev: n.elev,
        }
    }
}

impl From<OsmEdge> for Edge {
    fn from(e: OsmEdge) -> Edge {
        Edge {
            id: e.id,
            src: e.src,
            tgt: e.tgt,
            dist: e.dist,
        }
    }
}

impl From<Edge> for OsmEdge {
    fn from(e: Edge) -> OsmEdge {
        OsmEdge {
            id: e.id,
            src: e.src,
            tgt: e.tgt,
            dist: e.dist,
            road_type: 0,
            speed: -1,
        }
    }
}

/// Edge record of the CH store: a directed edge with a distance and a
/// travel-time metric, plus shortcut metadata.
///
/// A plain (non-shortcut) edge has `center_node == NO_NID` and both
/// children `NO_EID`; a shortcut bypasses `center_node` and references
/// the two underlying edges, forming a binary tree of edge ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub id: EdgeId,
    pub src: NodeId,
    pub tgt: NodeId,
    pub dist: u32,
    /// Travel time in 9/325 s units, see [`calc_time`].
    pub time: u32,
    pub child_edge1: EdgeId,
    pub child_edge2: EdgeId,
    pub center_node: NodeId,
}

impl Shortcut {
    /// A plain edge without shortcut metadata.
    pub fn plain(id: EdgeId, src: NodeId, tgt: NodeId, dist: u32, time: u32) -> Shortcut {
        Shortcut {
            id,
            src,
            tgt,
            dist,
            time,
            child_edge1: NO_EID,
            child_edge2: NO_EID,
            center_node: NO_NID,
        }
    }

    pub fn is_shortcut(&self) -> bool {
        self.center_node != NO_NID
    }

    /// The endpoint reached by traversing the edge in `direction`.
    pub fn other_node(&self, direction: Direction) -> NodeId {
        match direction {
            Direction::Out => self.tgt,
            Direction::In => self.src,
        }
    }

    /// Merge two adjacent edges into one plain edge, summing both
    /// metrics. Requires `e1.tgt == e2.src`.
    pub fn concat(e1: &Shortcut, e2: &Shortcut) -> Shortcut {
        assert_eq!(e1.tgt, e2.src, "concat of non-adjacent edges");
        Shortcut::plain(
            NO_EID,
            e1.src,
            e2.tgt,
            e1.dist.saturating_add(e2.dist),
            e1.time.saturating_add(e2.time),
        )
    }
}

/// Endpoint equality, ignoring ids and metrics.
pub fn equal_endpoints(a: &Shortcut, b: &Shortcut) -> bool {
    a.src == b.src && a.tgt == b.tgt
}

impl From<OsmEdge> for Shortcut {
    fn from(e: OsmEdge) -> Shortcut {
        Shortcut::plain(
            e.id,
            e.src,
            e.tgt,
            e.dist,
            calc_time(e.dist, e.road_type, e.speed),
        )
    }
}

/// Assumed travel speed (km/h) for a road type when the edge carries none.
pub fn default_speed(road_type: u32) -> u32 {
    match road_type {
        1 => 130,  // motorway
        2 => 100,  // motorway link
        3 => 70,   // primary
        4 => 70,   // primary link
        5 => 65,   // secondary
        6 => 65,   // secondary link
        7 => 60,   // tertiary
        8 => 60,   // tertiary link
        9 => 80,   // trunk
        10 => 80,  // trunk link
        11 => 30,  // unclassified
        12 => 50,  // residential
        13 => 30,  // living street
        14 => 30,  // road
        15 => 30,  // service
        16 => 30,  // turning circle
        _ => 50,
    }
}

/// Travel time for a distance at the effective speed, in 9/325 s units
/// (1/130000 h). Saturates at `u32::MAX`.
pub fn calc_time(dist: u32, road_type: u32, speed: i32) -> u32 {
    let speed = if speed > 0 {
        speed as u64
    } else {
        default_speed(road_type) as u64
    };
    let time = dist as u64 * 1300 / speed;
    time.min(u32::MAX as u64) as u32
}
