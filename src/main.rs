//! tus-uploadr - Resumable upload server
//!
//! Serves the tus 1.0.0 protocol and stores uploads on local disk.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tus_uploadr::{config::Config, server::shutdown_signal, server::Server};

/// tus-uploadr - Resumable upload server (tus 1.0.0)
#[derive(Parser, Debug)]
#[command(name = "tus-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tus-uploadr v{}", tus_uploadr::VERSION);

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    let shutdown_timeout = config.server.shutdown_timeout();

    // Start server
    let server = Server::bind(config).await?;
    let coordinator = server.shutdown_coordinator();
    let running = tokio::spawn(server.run());

    shutdown_signal().await;

    match coordinator.shutdown(shutdown_timeout).await {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => error!(error = %e, "Shutdown incomplete"),
    }

    running.await??;
    Ok(())
}
