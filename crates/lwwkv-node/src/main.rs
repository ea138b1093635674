#![warn(missing_docs)]

//! lwwkv Maelstrom node binary.

use anyhow::Result;
use clap::Parser;
use lwwkv_node::cli::Cli;
use tokio::io::BufReader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol messages, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.node_config()?;
    tracing::info!(
        publish_interval_ms = config.publish_interval_ms,
        queue_capacity = config.queue_capacity,
        lock_stripes = ?config.lock_stripes,
        "lwwkv node starting"
    );

    lwwkv_node::run(config, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    tracing::info!("lwwkv node stopped");
    Ok(())
}
