//! End-to-end pipeline checks: text ingest, contraction, OffTP export
//! and the query side reading the file back.

use std::io::Cursor;

use tempfile::NamedTempFile;

use chgraph::contract;
use chgraph::formats::offtp::{self, GraphFile, OfftpFile};
use chgraph::formats::text::StdReader;
use chgraph::formats::{read_graph, read_graph_with, write_graph, FileFormat, GraphData};
use chgraph::graph::GraphInData;
use chgraph::model::{Direction, OsmEdge, OsmNode, Shortcut, NO_EID, NO_LVL, NO_NID};
use chgraph::ChGraph;

fn osm_node(id: u32, lat: f64, lon: f64) -> OsmNode {
    OsmNode {
        id,
        osm_id: 1000 + id,
        lat,
        lon,
        elev: 0,
    }
}

fn osm_edge(src: u32, tgt: u32, dist: u32) -> OsmEdge {
    OsmEdge {
        id: 0,
        src,
        tgt,
        dist,
        road_type: 3,
        speed: -1,
    }
}

#[test]
fn two_node_chain_contracts_and_round_trips() {
    let data = GraphData {
        nodes: vec![osm_node(0, 0.0, 0.0), osm_node(1, 1.0, 1.0)],
        edges: vec![osm_edge(0, 1, 10), osm_edge(1, 0, 10)],
    };

    let mut graph = ChGraph::init(offtp::prepare(data));
    graph.restructure(&[0], &[true, false], Vec::new());
    assert_eq!(graph.node_level(0), 0);
    assert_eq!(graph.node_level(1), NO_LVL);
    assert_eq!(graph.n_edges(0), 0);
    assert_eq!(graph.n_edges(1), 0);

    let mut buf = Vec::new();
    OfftpFile::write_to(&mut buf, &graph.export_data()).unwrap();

    // magic reads back as "CHGOffTP"
    assert_eq!(&buf[0..8], b"CHGOffTP");

    let mut file = GraphFile::open(Cursor::new(buf)).unwrap();
    assert_eq!(file.edge_count(), 2);
    // the level-0 node keeps its grid cell and is found right away
    assert_eq!(file.find_node(0.0000001, 0.0000001).unwrap(), 0);
    // the core holds node 1
    let core = file.core_block_start();
    assert_eq!(file.find_node(1.0, 1.0).unwrap(), core << 10);
}

#[test]
fn triangle_merge_round_trips_through_offtp() {
    let data = GraphData {
        nodes: vec![
            osm_node(0, 0.0, 0.0),
            osm_node(1, 0.5, 0.5),
            osm_node(2, 1.0, 1.0),
        ],
        edges: vec![
            osm_edge(0, 1, 5),
            osm_edge(1, 2, 5),
            osm_edge(0, 2, 11),
        ],
    };

    let mut graph = ChGraph::init(offtp::prepare(data));
    let candidate = Shortcut {
        id: NO_EID,
        src: 0,
        tgt: 2,
        dist: 10,
        time: graph.edge(0).time + graph.edge(1).time,
        child_edge1: 0,
        child_edge2: 1,
        center_node: 1,
    };
    graph.restructure(&[1], &[false, true, false], vec![candidate]);

    // the longer direct edge gave its slot to the shortcut
    let out0 = graph.node_edges(0, Direction::Out);
    assert_eq!(out0.len(), 1);
    let merged = *graph.edge(out0[0]);
    assert_eq!((merged.src, merged.tgt, merged.dist), (0, 2, 10));
    assert_eq!(merged.center_node, 1);

    let tmp = NamedTempFile::new().unwrap();
    OfftpFile::write(tmp.path(), &graph.export_data()).unwrap();

    let mut file = GraphFile::open(std::fs::File::open(tmp.path()).unwrap()).unwrap();
    assert_eq!(file.edge_count(), 3);
    assert_ne!(file.core_block_start(), u32::MAX);

    // every node is found at its own coordinates
    let id0 = file.find_node(0.0, 0.0).unwrap();
    let id1 = file.find_node(0.5, 0.5).unwrap();
    let id2 = file.find_node(1.0, 1.0).unwrap();
    assert_ne!(id0, NO_NID);
    assert_ne!(id1, NO_NID);
    assert_ne!(id2, NO_NID);
    assert_ne!(id0, id2);
    // node 1 was contracted at level 0 and sits in a base-grid block
    assert!(id1 >> 10 < 256 * 256);
    // the core nodes share the core block
    assert_eq!(id0 >> 10, file.core_block_start());
    assert_eq!(id2 >> 10, file.core_block_start());
}

#[test]
fn contracted_path_preserves_reachability_metadata() {
    // a longer path through the full pipeline: ingest, contract with
    // the built-in contractor, export, re-open
    let n = 12;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for i in 0..n {
        nodes.push(osm_node(i, i as f64 * 0.01, i as f64 * 0.01));
        if i + 1 < n {
            edges.push(osm_edge(i, i + 1, 100));
            edges.push(osm_edge(i + 1, i, 100));
        }
    }
    let mut graph = ChGraph::init(offtp::prepare(GraphData { nodes, edges }));
    let rounds = contract::contract(&mut graph, offtp::CORE_LEVEL);
    assert!(rounds > 0);

    // every shortcut in the arena decomposes into its children
    for id in 0..graph.nr_edges() {
        let edge = *graph.edge(id);
        if edge.is_shortcut() {
            let c1 = graph.edge(edge.child_edge1);
            let c2 = graph.edge(edge.child_edge2);
            assert_eq!(c1.tgt, edge.center_node);
            assert_eq!(c2.src, edge.center_node);
            assert_eq!(c1.dist + c2.dist, edge.dist);
        }
    }

    let mut buf = Vec::new();
    OfftpFile::write_to(&mut buf, &graph.export_data()).unwrap();
    let mut file = GraphFile::open(Cursor::new(buf)).unwrap();
    assert!(file.edge_count() > 0);
    // endpoints of the path remain addressable
    assert_ne!(file.find_node(0.0, 0.0).unwrap(), NO_NID);
    assert_ne!(file.find_node(0.11, 0.11).unwrap(), NO_NID);
}

#[test]
fn text_formats_round_trip_on_disk() {
    let data = GraphData {
        nodes: vec![osm_node(0, 48.7, 9.1), osm_node(1, 48.8, 9.2)],
        edges: vec![osm_edge(0, 1, 500), osm_edge(1, 0, 500)],
    };

    let std_file = NamedTempFile::new().unwrap();
    write_graph(FileFormat::Std, std_file.path(), &data).unwrap();
    let back = read_graph(FileFormat::Std, std_file.path()).unwrap();
    assert_eq!(back.nodes, data.nodes);
    assert_eq!(back.edges, data.edges);

    // FMI_CH output reads back through the FMI reader
    let fmi_file = NamedTempFile::new().unwrap();
    write_graph(FileFormat::FmiCh, fmi_file.path(), &data).unwrap();
    let back = read_graph(FileFormat::Fmi, fmi_file.path()).unwrap();
    assert_eq!(back.nodes, data.nodes);

    // SIMPLE drops the OSM metadata
    let simple_file = NamedTempFile::new().unwrap();
    write_graph(FileFormat::Simple, simple_file.path(), &data).unwrap();
    let back = read_graph(FileFormat::Simple, simple_file.path()).unwrap();
    assert_eq!(back.nodes[0].osm_id, 0);
    assert_eq!(back.edges[0].speed, -1);

    // OFFTP is not readable as a node list
    assert!(read_graph(FileFormat::Offtp, std_file.path()).is_err());
}

#[test]
fn ingested_time_metric_feeds_the_edge_section() {
    // primary road, default speed 70: time = 400 * 1300 / 70
    let data = GraphData {
        nodes: vec![osm_node(0, 0.0, 0.0), osm_node(1, 1.0, 1.0)],
        edges: vec![osm_edge(0, 1, 400)],
    };
    let prepared: GraphInData<offtp::Node> = offtp::prepare(data);
    assert_eq!(prepared.edges[0].time, 400 * 1300 / 70);

    let text = "2 1\n0 100 0.0 0.0 0\n1 101 1.0 1.0 0\n0 1 400 3 -1\n";
    let parsed = read_graph_with(StdReader::new(Cursor::new(text))).unwrap();
    let prepared = offtp::prepare(parsed);
    assert_eq!(prepared.edges[0].time, 7428);
}
