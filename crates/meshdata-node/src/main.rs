//! Meshdata Node - runs one peer until interrupted.

use anyhow::Context;
use clap::Parser;
use meshdata_node::observability::init_logging;
use meshdata_node::{NodeConfig, Peer};
use std::path::PathBuf;

/// Meshdata Node - shared data stores and service discovery for a mesh of peers
#[derive(Parser, Debug)]
#[command(name = "meshdata-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.json_logs |= args.json;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    init_logging(&config.log_level, config.json_logs)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting meshdata node");

    let peer = tokio::task::spawn_blocking(move || Peer::start(config))
        .await?
        .context("starting peer")?;
    tracing::info!(
        name = %peer.config().name,
        hub_url = %peer.hub_url(),
        rpc_url = %peer.rpc().url(),
        "Node is ready. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    tokio::task::spawn_blocking(move || peer.shutdown()).await?;
    Ok(())
}
