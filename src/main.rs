use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};

use chgraph::contract;
use chgraph::formats::offtp::{self, GraphFile, OfftpFile};
use chgraph::formats::{self, FileFormat};
use chgraph::graph::ChGraph;
use chgraph::model::NO_NID;

#[derive(Parser)]
#[command(name = "chgraph")]
#[command(about = "Contraction-hierarchy graph construction and export", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a graph between file formats
    Convert {
        /// Input graph file
        input: PathBuf,
        /// Output graph file
        output: PathBuf,
        /// Input format (STD, SIMPLE, FMI)
        #[arg(long)]
        from: String,
        /// Output format (STD, SIMPLE, FMI_CH, OFFTP)
        #[arg(long)]
        to: String,
    },
    /// Find the node nearest to a coordinate in an OffTP graph file
    Snap {
        /// OffTP graph file
        graph: PathBuf,
        /// Query coordinate as lon,lat
        #[arg(long)]
        at: String,
    },
}

fn parse_coord(s: &str) -> Result<(f64, f64)> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        anyhow::bail!("coordinate must be in format 'lon,lat'");
    }
    let lon = parts[0].trim().parse::<f64>()?;
    let lat = parts[1].trim().parse::<f64>()?;
    Ok((lon, lat))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            from,
            to,
        } => {
            let from: FileFormat = from.parse()?;
            let to: FileFormat = to.parse()?;

            let start = Instant::now();
            let data = formats::read_graph(from, &input)?;
            println!(
                "Read {} nodes and {} edges in {:.2}s",
                data.nodes.len(),
                data.edges.len(),
                start.elapsed().as_secs_f64()
            );

            if to == FileFormat::Offtp {
                let build_start = Instant::now();
                let mut graph = ChGraph::init(offtp::prepare(data));
                let rounds = contract::contract(&mut graph, offtp::CORE_LEVEL);
                let core = (0..graph.nr_nodes())
                    .filter(|&n| graph.node_level(n) >= offtp::CORE_LEVEL)
                    .count();
                println!(
                    "Contracted {} rounds in {:.2}s: {} edges total, {} core nodes",
                    rounds,
                    build_start.elapsed().as_secs_f64(),
                    graph.nr_edges(),
                    core
                );

                let write_start = Instant::now();
                OfftpFile::write(&output, &graph.export_data())?;
                println!(
                    "Wrote {} in {:.2}s",
                    output.display(),
                    write_start.elapsed().as_secs_f64()
                );
            } else {
                formats::write_graph(to, &output, &data)?;
                println!("Wrote {}", output.display());
            }
        }
        Commands::Snap { graph, at } => {
            let (lon, lat) = parse_coord(&at)?;
            let file = File::open(&graph)?;
            let mut graph_file = GraphFile::open(BufReader::new(file))?;
            let id = graph_file.find_node(lon, lat)?;
            if id == NO_NID {
                println!("no node found");
            } else {
                println!("{} (block {}, slot {})", id, id >> 10, id & 1023);
            }
        }
    }

    Ok(())
}
