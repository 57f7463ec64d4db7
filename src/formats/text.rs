//! Whitespace-delimited text graph formats.
//!
//! STD and FMI carry OSM-style records (`id osm_id lat lon elev` /
//! `src tgt dist type speed`), SIMPLE carries bare geo records
//! (`lat lon elev` / `src tgt dist`). FMI is STD with a `#`-comment
//! header; FMI_CH writes the STD body under a generated comment header.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use rand::Rng;

use super::{GraphReader, GraphWriter};
use crate::model::{Edge, EdgeId, GeoNode, NodeId, OsmEdge, OsmNode};

/// Pulls whitespace-separated tokens off a buffered source, line by
/// line.
struct TokenReader<R: BufRead> {
    src: R,
    line: String,
    pos: usize,
}

impl<R: BufRead> TokenReader<R> {
    fn new(src: R) -> TokenReader<R> {
        TokenReader {
            src,
            line: String::new(),
            pos: 0,
        }
    }

    fn token_range(line: &str, pos: usize) -> Option<(usize, usize)> {
        let rest = &line[pos..];
        let start = pos + rest.find(|c: char| !c.is_whitespace())?;
        let end = line[start..]
            .find(char::is_whitespace)
            .map(|off| start + off)
            .unwrap_or(line.len());
        Some((start, end))
    }

    fn next_token(&mut self) -> Result<&str> {
        let (start, end) = loop {
            if let Some(range) = Self::token_range(&self.line, self.pos) {
                break range;
            }
            self.line.clear();
            self.pos = 0;
            if self.src.read_line(&mut self.line)? == 0 {
                bail!("unexpected end of input");
            }
        };
        self.pos = end;
        Ok(&self.line[start..end])
    }

    fn parse<T>(&mut self) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let token = self.next_token()?;
        let parsed = token
            .parse()
            .with_context(|| format!("invalid token '{token}'"))?;
        Ok(parsed)
    }

    /// Drop whole lines starting with `#` until a non-comment line with
    /// content is current. Used for the FMI header.
    fn skip_comment_lines(&mut self) -> Result<()> {
        loop {
            let rest = self.line[self.pos..].trim_start();
            if rest.starts_with('#') {
                self.line.clear();
                self.pos = 0;
                continue;
            }
            if !rest.is_empty() {
                return Ok(());
            }
            self.line.clear();
            self.pos = 0;
            if self.src.read_line(&mut self.line)? == 0 {
                bail!("unexpected end of input");
            }
        }
    }
}

/// STD reader: OSM nodes and edges, ids checked against position.
pub struct StdReader<R: BufRead> {
    tokens: TokenReader<R>,
}

impl StdReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("couldn't open graph file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> StdReader<R> {
    pub fn new(src: R) -> Self {
        StdReader {
            tokens: TokenReader::new(src),
        }
    }
}

impl<R: BufRead> GraphReader for StdReader<R> {
    type Node = OsmNode;
    type Edge = OsmEdge;

    fn read_header(&mut self) -> Result<(u32, u32)> {
        Ok((self.tokens.parse()?, self.tokens.parse()?))
    }

    fn read_node(&mut self, id: NodeId) -> Result<OsmNode> {
        let node = OsmNode {
            id: self.tokens.parse()?,
            osm_id: self.tokens.parse()?,
            lat: self.tokens.parse()?,
            lon: self.tokens.parse()?,
            elev: self.tokens.parse()?,
        };
        if node.id != id {
            bail!("invalid node id {} at index {}", node.id, id);
        }
        Ok(node)
    }

    fn read_edge(&mut self, id: EdgeId) -> Result<OsmEdge> {
        Ok(OsmEdge {
            id,
            src: self.tokens.parse()?,
            tgt: self.tokens.parse()?,
            dist: self.tokens.parse()?,
            road_type: self.tokens.parse()?,
            speed: self.tokens.parse()?,
        })
    }
}

/// SIMPLE reader: bare geo nodes and distance edges, ids by position.
pub struct SimpleReader<R: BufRead> {
    tokens: TokenReader<R>,
}

impl SimpleReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("couldn't open graph file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> SimpleReader<R> {
    pub fn new(src: R) -> Self {
        SimpleReader {
            tokens: TokenReader::new(src),
        }
    }
}

impl<R: BufRead> GraphReader for SimpleReader<R> {
    type Node = GeoNode;
    type Edge = Edge;

    fn read_header(&mut self) -> Result<(u32, u32)> {
        Ok((self.tokens.parse()?, self.tokens.parse()?))
    }

    fn read_node(&mut self, id: NodeId) -> Result<GeoNode> {
        Ok(GeoNode {
            id,
            lat: self.tokens.parse()?,
            lon: self.tokens.parse()?,
            elev: self.tokens.parse()?,
        })
    }

    fn read_edge(&mut self, id: EdgeId) -> Result<Edge> {
        Ok(Edge {
            id,
            src: self.tokens.parse()?,
            tgt: self.tokens.parse()?,
            dist: self.tokens.parse()?,
        })
    }
}

/// FMI reader: STD with leading `#` comment lines.
pub struct FmiReader<R: BufRead> {
    inner: StdReader<R>,
}

impl FmiReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("couldn't open graph file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> FmiReader<R> {
    pub fn new(src: R) -> Self {
        FmiReader {
            inner: StdReader::new(src),
        }
    }
}

impl<R: BufRead> GraphReader for FmiReader<R> {
    type Node = OsmNode;
    type Edge = OsmEdge;

    fn read_header(&mut self) -> Result<(u32, u32)> {
        self.inner.tokens.skip_comment_lines()?;
        self.inner.read_header()
    }

    fn read_node(&mut self, id: NodeId) -> Result<OsmNode> {
        self.inner.read_node(id)
    }

    fn read_edge(&mut self, id: EdgeId) -> Result<OsmEdge> {
        self.inner.read_edge(id)
    }
}

/// STD writer.
pub struct StdWriter<W: Write> {
    out: W,
}

impl StdWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("couldn't create graph file '{}'", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> StdWriter<W> {
    pub fn new(out: W) -> Self {
        StdWriter { out }
    }
}

impl<W: Write> GraphWriter for StdWriter<W> {
    type Node = OsmNode;
    type Edge = OsmEdge;

    fn write_header(&mut self, nr_nodes: u32, nr_edges: u32) -> Result<()> {
        writeln!(self.out, "{nr_nodes}")?;
        writeln!(self.out, "{nr_edges}")?;
        Ok(())
    }

    fn write_node(&mut self, node: &OsmNode, id: NodeId) -> Result<()> {
        if node.id != id {
            bail!("invalid node id {} at index {}", node.id, id);
        }
        writeln!(
            self.out,
            "{} {} {} {} {}",
            node.id, node.osm_id, node.lat, node.lon, node.elev
        )?;
        Ok(())
    }

    fn write_edge(&mut self, edge: &OsmEdge, _id: EdgeId) -> Result<()> {
        writeln!(
            self.out,
            "{} {} {} {} {}",
            edge.src, edge.tgt, edge.dist, edge.road_type, edge.speed
        )?;
        Ok(())
    }
}

/// SIMPLE writer.
pub struct SimpleWriter<W: Write> {
    out: W,
}

impl SimpleWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("couldn't create graph file '{}'", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> SimpleWriter<W> {
    pub fn new(out: W) -> Self {
        SimpleWriter { out }
    }
}

impl<W: Write> GraphWriter for SimpleWriter<W> {
    type Node = GeoNode;
    type Edge = Edge;

    fn write_header(&mut self, nr_nodes: u32, nr_edges: u32) -> Result<()> {
        writeln!(self.out, "{nr_nodes}")?;
        writeln!(self.out, "{nr_edges}")?;
        Ok(())
    }

    fn write_node(&mut self, node: &GeoNode, _id: NodeId) -> Result<()> {
        writeln!(self.out, "{} {} {}", node.lat, node.lon, node.elev)?;
        Ok(())
    }

    fn write_edge(&mut self, edge: &Edge, _id: EdgeId) -> Result<()> {
        writeln!(self.out, "{} {} {}", edge.src, edge.tgt, edge.dist)?;
        Ok(())
    }
}

/// FMI_CH writer: STD body under a generated comment header.
pub struct FmiChWriter<W: Write> {
    inner: StdWriter<W>,
}

impl FmiChWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("couldn't create graph file '{}'", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FmiChWriter<W> {
    pub fn new(out: W) -> Self {
        FmiChWriter {
            inner: StdWriter::new(out),
        }
    }
}

fn random_id(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}

impl<W: Write> GraphWriter for FmiChWriter<W> {
    type Node = OsmNode;
    type Edge = OsmEdge;

    fn write_header(&mut self, nr_nodes: u32, nr_edges: u32) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        writeln!(self.inner.out, "# Id : {}", random_id(32))?;
        writeln!(self.inner.out, "# Timestamp : {timestamp}")?;
        writeln!(self.inner.out, "# Type: maxspeed")?;
        writeln!(self.inner.out, "# Revision: 1")?;
        writeln!(self.inner.out)?;
        self.inner.write_header(nr_nodes, nr_edges)
    }

    fn write_node(&mut self, node: &OsmNode, id: NodeId) -> Result<()> {
        self.inner.write_node(node, id)
    }

    fn write_edge(&mut self, edge: &OsmEdge, id: EdgeId) -> Result<()> {
        self.inner.write_edge(edge, id)
    }
}
