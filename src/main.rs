use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;
use tracing::{info, warn};

use drouter::{Config, ProxyServer};

#[derive(Parser)]
#[command(name = "drouter")]
#[command(about = "A dynamic HTTP reverse-proxy router with runtime route registration")]
struct Args {
    #[arg(short, long, default_value = "config/drouter.toml")]
    config: String,

    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("drouter={}", level))
        .init();

    info!("Starting drouter front door");

    // Load configuration; a missing file falls back to defaults so the
    // router can come up empty and be filled by registering clients.
    let config = if Path::new(&args.config).exists() {
        Config::from_file_with_env(&args.config).await?
    } else {
        warn!("Config file {} not found, using defaults", args.config);
        Config::default()
    };

    let bind = args.bind.unwrap_or(config.server.bind);
    let server = ProxyServer::new(config)?;

    // Setup graceful shutdown
    let shutdown_signal = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        warn!("Received CTRL+C, shutting down gracefully...");
    };

    tokio::select! {
        result = server.run(bind) => {
            if let Err(e) = result {
                tracing::error!("Front door error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
        }
    }

    info!("drouter shutdown complete");
    Ok(())
}
