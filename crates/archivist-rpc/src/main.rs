//! Archivist RPC Server - HTTP and JSON-RPC front end for the model catalog.
//!
//! This binary loads a TOML configuration, opens the archivist-core catalog
//! once and serves the catalog read interface and the scan trigger.

mod config_file;
mod handlers;
mod server;

use anyhow::{Context, Result};
use archivist_core::Archivist;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "archivist-rpc")]
#[command(about = "HTTP/JSON-RPC server for the model archivist catalog")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one reconcile pass before serving
    #[arg(long)]
    scan_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Archivist RPC Server");

    let config_path = match args.config {
        Some(path) => path,
        None => config_file::default_config_path()
            .context("No --config given and no platform config directory is available")?,
    };
    info!("Config file: {}", config_path.display());

    let config = config_file::load_or_create_config(&config_path)?;
    let archivist = tokio::task::spawn_blocking(move || Archivist::open(config))
        .await?
        .context("Failed to open the catalog")?;
    let archivist = Arc::new(archivist);

    if args.scan_on_start {
        let scanner = Arc::clone(&archivist);
        match tokio::task::spawn_blocking(move || scanner.reconcile_all()).await? {
            Ok(report) => info!(
                "Initial scan {}: {} observed, {} inserted, {} updated",
                report.scan_id, report.observed, report.inserted, report.updated
            ),
            Err(e) => warn!("Initial scan failed: {}", e),
        }
    }

    let addr = server::start_server(archivist, &args.host, args.port).await?;

    // Read by the parent process to discover the auto-assigned port
    println!("ARCHIVIST_PORT={}", addr.port());

    info!("Archivist server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
