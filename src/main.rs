//! dev-service-host — many named services behind one local HTTP port.
//!
//! Requests pick a service with the `X-Service` header. New services can be
//! hot-loaded with `X-Service: __hotload` and the listener is closed with
//! `X-Service: __shutdown`, after which the process exits.
//!
//! Usage:
//!   dev-service-host                          # 127.0.0.1:63578
//!   dev-service-host --port 0                 # OS-assigned port
//!   dev-service-host --config host.json       # {"outputOnListen", "host", "port"}
//!   dev-service-host --modules ./services     # resolve hot-load files from ./services

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use devhost_server::{CommandLoader, Host, HostConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dev-service-host", about = "Local service host with hot loading")]
struct Cli {
    /// Hostname to bind to
    #[arg(long)]
    hostname: Option<String>,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long)]
    port: Option<u16>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory that relative hot-load module paths are resolved against
    #[arg(long)]
    modules: Option<PathBuf>,

    /// Don't print the readiness line
    #[arg(long)]
    quiet: bool,

    /// Log progress (debug level) to stderr
    #[arg(long)]
    verbose: bool,
}

/// Defaults, then the config file, then command-line flags.
fn load_config(cli: &Cli) -> Result<HostConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("invalid config {}: {e}", path.display()))?
        }
        None => HostConfig::default(),
    };

    if let Some(hostname) = &cli.hostname {
        config.host = hostname.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.quiet {
        config.output_on_listen = false;
    }
    Ok(config)
}

/// stdout carries only the readiness line; stderr stays empty on a clean run.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let loader = match &cli.modules {
        Some(dir) => CommandLoader::new(dir.canonicalize().unwrap_or_else(|_| dir.clone())),
        None => CommandLoader::current_dir(),
    };
    info!("Resolving hot-load modules from {}", loader.base_dir().display());

    let host = Host::with_loader(config, Arc::new(loader));

    if let Err(e) = host.listen().await {
        error!("Failed to start listening: {e}");
        std::process::exit(1);
    }

    tokio::select! {
        _ = host.closed() => {
            info!("Listener closed, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping listener");
            host.stop_listening().await;
        }
    }
}
