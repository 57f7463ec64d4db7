//! chgraph: contraction-hierarchy graph construction and Offline
//! ToureNPlaner (OffTP) export.
//!
//! Pipeline:
//! - Ingest: read a node/edge list from one of the text graph formats
//!   (STD, SIMPLE, FMI)
//! - CH store: build the in-memory multigraph with source- and
//!   target-sorted edge indices
//! - Contraction: apply rounds of node removal, merging shortcut edges
//!   into the store while keeping the indices consistent
//! - Export: lay the contracted graph out as a block-paged, spatially
//!   indexed OffTP file, or write it back as text (STD, SIMPLE, FMI_CH)
//!
//! The OffTP reader side ([`formats::offtp::GraphFile`]) answers
//! nearest-node queries against the finished file by hopping through the
//! spatial grid; it never loads the whole graph.

pub mod contract;
pub mod formats;
pub mod graph;
pub mod model;

pub use graph::ChGraph;
pub use model::{Direction, Edge, GeoNode, Node, OsmEdge, OsmNode, Shortcut};
