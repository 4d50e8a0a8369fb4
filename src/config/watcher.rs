//! Configuration file watcher for hot reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, seed_routes, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::discovery::StaticDiscovery;
use crate::http::HttpServer;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = %path.display(), "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(config) => {
                            let _ = tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Bring the running server in line with a reloaded configuration.
///
/// Service address lists are swapped in place; services dropped from the file
/// lose their addresses. Seed routes that are new or changed are set, seed
/// routes that vanished are removed. Routes added through the admin API are
/// left alone. Listeners are never restarted.
pub async fn apply_reload(
    previous: &ProxyConfig,
    next: &ProxyConfig,
    discovery: &StaticDiscovery,
    server: &HttpServer,
) -> Result<(), ConfigError> {
    let next_routes = seed_routes(next)?;
    let previous_routes = seed_routes(previous).unwrap_or_default();

    for (name, service) in &next.services {
        discovery.set_addrs(name, service.addrs.iter().cloned());
    }
    for name in previous.services.keys() {
        if !next.services.contains_key(name) {
            discovery.set_addrs(name, Vec::<String>::new());
        }
    }

    let keep: HashSet<&str> = next_routes.iter().map(|r| r.id.as_str()).collect();
    for route in &previous_routes {
        if !keep.contains(route.id.as_str()) {
            if let Err(e) = server.remove_route(&route.id).await {
                tracing::warn!(route_id = %route.id, error = %e, "Failed to remove seed route");
            }
        }
    }

    for route in next_routes {
        if previous_routes.contains(&route) {
            continue;
        }
        let domain = route.domain.clone();
        if let Err(e) = server.set_route(route).await {
            tracing::warn!(domain = %domain, error = %e, "Failed to apply seed route");
        }
    }

    tracing::info!(
        routes = next.routes.len(),
        services = next.services.len(),
        "Configuration reloaded"
    );
    Ok(())
}
