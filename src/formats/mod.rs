//! Graph file formats.
//!
//! Text formats carry plain node/edge lists (see [`text`]); the binary
//! OffTP format (see [`offtp`]) carries a finished contraction
//! hierarchy. Readers and writers are concrete implementations of the
//! [`GraphReader`] / [`GraphWriter`] interfaces; the drivers below
//! enforce the header → nodes → edges sequence and consume the
//! implementation, so a reader yields its sequence exactly once.

pub mod offtp;
pub mod text;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::model::{EdgeId, NodeId, OsmEdge, OsmNode};

/// The supported graph file formats. OFFTP is write-only and is reached
/// through the CH pipeline, not through [`write_graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Std,
    Simple,
    Fmi,
    FmiCh,
    Offtp,
}

impl FromStr for FileFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<FileFormat> {
        match s {
            "STD" => Ok(FileFormat::Std),
            "SIMPLE" => Ok(FileFormat::Simple),
            "FMI" => Ok(FileFormat::Fmi),
            "FMI_CH" => Ok(FileFormat::FmiCh),
            "OFFTP" => Ok(FileFormat::Offtp),
            _ => bail!("unknown file format: {s}"),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileFormat::Std => "STD",
            FileFormat::Simple => "SIMPLE",
            FileFormat::Fmi => "FMI",
            FileFormat::FmiCh => "FMI_CH",
            FileFormat::Offtp => "OFFTP",
        };
        f.write_str(name)
    }
}

/// A plain node/edge list as produced by any reader. Node ids are dense
/// `[0, N)`; every edge endpoint names a valid node.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub nodes: Vec<OsmNode>,
    pub edges: Vec<OsmEdge>,
}

/// Sequential graph source: a header with exact counts, then that many
/// nodes, then that many edges.
pub trait GraphReader {
    type Node: Into<OsmNode>;
    type Edge: Into<OsmEdge>;

    /// Read the header; returns `(nr_nodes, nr_edges)`.
    fn read_header(&mut self) -> Result<(u32, u32)>;
    fn read_node(&mut self, id: NodeId) -> Result<Self::Node>;
    fn read_edge(&mut self, id: EdgeId) -> Result<Self::Edge>;
}

/// Sequential graph sink, mirror of [`GraphReader`].
pub trait GraphWriter {
    type Node: From<OsmNode>;
    type Edge: From<OsmEdge>;

    fn write_header(&mut self, nr_nodes: u32, nr_edges: u32) -> Result<()>;
    fn write_node(&mut self, node: &Self::Node, id: NodeId) -> Result<()>;
    fn write_edge(&mut self, edge: &Self::Edge, id: EdgeId) -> Result<()>;
}

/// Drain a reader into a [`GraphData`].
pub fn read_graph_with<R: GraphReader>(mut reader: R) -> Result<GraphData> {
    let (nr_nodes, nr_edges) = reader.read_header()?;

    let mut nodes = Vec::with_capacity(nr_nodes as usize);
    for id in 0..nr_nodes {
        nodes.push(reader.read_node(id)?.into());
    }
    let mut edges = Vec::with_capacity(nr_edges as usize);
    for id in 0..nr_edges {
        edges.push(reader.read_edge(id)?.into());
    }

    for edge in &edges {
        if edge.src as usize >= nodes.len() || edge.tgt as usize >= nodes.len() {
            bail!(
                "edge {} -> {} references a node out of range (have {})",
                edge.src,
                edge.tgt,
                nodes.len()
            );
        }
    }
    Ok(GraphData { nodes, edges })
}

/// Write a [`GraphData`] through a writer, projecting node and edge
/// records into the writer's own types.
pub fn write_graph_with<W: GraphWriter>(mut writer: W, data: &GraphData) -> Result<()> {
    writer.write_header(data.nodes.len() as u32, data.edges.len() as u32)?;
    for (id, node) in data.nodes.iter().enumerate() {
        writer.write_node(&W::Node::from(*node), id as NodeId)?;
    }
    for (id, edge) in data.edges.iter().enumerate() {
        writer.write_edge(&W::Edge::from(*edge), id as EdgeId)?;
    }
    Ok(())
}

/// Read a graph file in the given format.
pub fn read_graph(format: FileFormat, path: &Path) -> Result<GraphData> {
    match format {
        FileFormat::Std => read_graph_with(text::StdReader::open(path)?),
        FileFormat::Simple => read_graph_with(text::SimpleReader::open(path)?),
        FileFormat::Fmi => read_graph_with(text::FmiReader::open(path)?),
        FileFormat::FmiCh | FileFormat::Offtp => {
            bail!("{format} graphs cannot be read")
        }
    }
}

/// Write a graph file in the given format.
pub fn write_graph(format: FileFormat, path: &Path, data: &GraphData) -> Result<()> {
    match format {
        FileFormat::Std => write_graph_with(text::StdWriter::create(path)?, data),
        FileFormat::Simple => write_graph_with(text::SimpleWriter::create(path)?, data),
        FileFormat::FmiCh => write_graph_with(text::FmiChWriter::create(path)?, data),
        FileFormat::Fmi => bail!("FMI graphs are written as FMI_CH"),
        FileFormat::Offtp => {
            bail!("OFFTP takes a contracted graph; export through the offtp module")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_round_trip() {
        for (name, format) in [
            ("STD", FileFormat::Std),
            ("SIMPLE", FileFormat::Simple),
            ("FMI", FileFormat::Fmi),
            ("FMI_CH", FileFormat::FmiCh),
            ("OFFTP", FileFormat::Offtp),
        ] {
            assert_eq!(name.parse::<FileFormat>().unwrap(), format);
            assert_eq!(format.to_string(), name);
        }
        assert!("fmi".parse::<FileFormat>().is_err());
    }
}
