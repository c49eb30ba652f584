mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chronicle::config::ChronicleConfig;
use chronicle::service::GraphService;

#[derive(Parser)]
#[command(name = "chronicle", version, about = "Memory graph and temporal reasoning engine for engineering artifacts")]
struct Cli {
    /// Config file (defaults to ~/.chronicle/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// Transport: stdio or http (overrides config)
        #[arg(long)]
        transport: Option<String>,
    },
    /// Stage artifacts from a JSON array or JSONL file
    Ingest {
        #[arg(long)]
        org: String,
        file: PathBuf,
        /// Only stage the artifacts; do not rebuild
        #[arg(long)]
        no_rebuild: bool,
    },
    /// Rebuild the graph from staged artifacts
    Rebuild {
        #[arg(long)]
        org: String,
        /// RFC 3339 cutoff; omit to resume from the last completed rebuild
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Chronological timeline around an artifact
    Timeline {
        #[arg(long)]
        org: String,
        foreign_id: String,
        /// Window half-width in hours
        #[arg(long)]
        window_hours: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Explain a "why" question
    Explain {
        #[arg(long)]
        org: String,
        query: String,
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show an artifact and its direct neighbors
    Neighborhood {
        #[arg(long)]
        org: String,
        foreign_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Graph statistics for one org
    Stats {
        #[arg(long)]
        org: String,
        #[arg(long)]
        json: bool,
    },
    /// Run database diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ChronicleConfig::load_from(path)?,
        None => ChronicleConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC and CLI output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            if let Some(transport) = transport {
                config.server.transport = transport;
            }
            chronicle::server::serve(config).await?;
        }
        Command::Doctor => cli::doctor::doctor(&config)?,
        command => {
            let service = GraphService::open(config)?;
            match command {
                Command::Ingest { org, file, no_rebuild } => {
                    cli::ingest::ingest(&service, &org, &file, !no_rebuild).await?
                }
                Command::Rebuild { org, since, json } => {
                    cli::rebuild::rebuild(&service, &org, since.as_deref(), json).await?
                }
                Command::Timeline { org, foreign_id, window_hours, json } => {
                    cli::query::timeline(&service, &org, &foreign_id, window_hours, json).await?
                }
                Command::Explain { org, query, depth, k, json } => {
                    cli::query::explain(&service, &org, &query, depth, k, json).await?
                }
                Command::Neighborhood { org, foreign_id, json } => {
                    cli::query::neighborhood(&service, &org, &foreign_id, json).await?
                }
                Command::Stats { org, json } => cli::stats::stats(&service, &org, json).await?,
                Command::Serve { .. } | Command::Doctor => unreachable!("handled above"),
            }
        }
    }

    Ok(())
}
