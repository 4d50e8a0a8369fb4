//! hostgate proxy binary.
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────────────┐
//!                 │                         HOSTGATE                          │
//!   Client        │  ┌──────────┐   ┌──────────┐   ┌─────────────┐            │
//!   ──────────────┼─▶│ net      │──▶│ http     │──▶│ route table │            │
//!   (HTTP/HTTPS)  │  │ listener │   │ server   │   │ Host / SNI  │            │
//!                 │  │ + SNI    │   └──────────┘   └──────┬──────┘            │
//!                 │  └──────────┘                         │                   │
//!                 │                                       ▼                   │
//!   Client        │  ┌──────────┐   ┌──────────┐   ┌─────────────┐            │
//!   ◀─────────────┼──│ response │◀──│ proxy /  │◀──│ service     │◀───────────┼── Backend
//!                 │  │ headers  │   │ upgrade  │   │ addrs+sticky│            │
//!                 │  └──────────┘   └──────────┘   └─────────────┘            │
//!                 │                                                           │
//!                 │   route store ──sync──▶ route table ──events──▶ admin SSE │
//!                 └───────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use hostgate::config::{load_config, ConfigWatcher, ProxyConfig};
use hostgate::lifecycle::{next_signal, Gateway, Signal};
use hostgate::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "hostgate", version, about = "Dynamic HTTP/HTTPS reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watch the configuration file and apply changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hostgate starting");
    tracing::info!(
        http_address = %config.listener.http_address,
        https_address = %config.listener.https_address,
        routes = config.routes.len(),
        services = config.services.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut gateway = Gateway::start(config).await?;

    // The watcher stops when dropped, so it is kept alive here.
    let (_watcher, mut updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(updates))
        }
        _ => (None, None),
    };

    loop {
        let update = async {
            match updates.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            signal = next_signal() => match signal? {
                Signal::Shutdown => break,
                Signal::Reload => match &cli.config {
                    Some(path) => match load_config(path) {
                        Ok(next) => reload(&mut gateway, next).await,
                        Err(e) => tracing::error!(error = %e, "Reload failed, keeping current configuration"),
                    },
                    None => tracing::warn!("Reload requested without a config file"),
                },
            },
            Some(next) = update => reload(&mut gateway, next).await,
        }
    }

    tracing::info!("Shutdown signal received");
    gateway.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn reload(gateway: &mut Gateway, next: ProxyConfig) {
    if let Err(e) = gateway.reload(next).await {
        tracing::error!(error = %e, "Reload failed, keeping current configuration");
    }
}
