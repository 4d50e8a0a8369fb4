//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated configuration into running subsystems
//! - Seed the route store and the static address lists
//! - Start the listener pair, then the admin API
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Admin starts last so it never reports a half-started proxy

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::admin::{setup_admin_router, AdminState, Capabilities};
use crate::config::loader::{default_key_pair, seed_routes, sticky_key};
use crate::config::{apply_reload, AdminConfig, ConfigError, ProxyConfig};
use crate::discovery::StaticDiscovery;
use crate::error::RouterError;
use crate::http::{HttpServer, ServerSettings};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::store::MemoryRouteStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("admin: failed to bind {addr}: {source}")]
    Admin {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running proxy: listeners, route store, address lists and admin API.
pub struct Gateway {
    server: Arc<HttpServer>,
    discovery: StaticDiscovery,
    config: ProxyConfig,
    shutdown: Shutdown,
    admin_addr: Option<SocketAddr>,
}

impl Gateway {
    pub async fn start(config: ProxyConfig) -> Result<Self, StartupError> {
        let discovery = StaticDiscovery::new();
        for (name, service) in &config.services {
            discovery.set_addrs(name, service.addrs.iter().cloned());
        }

        let store = Arc::new(MemoryRouteStore::with_routes(seed_routes(&config)?));
        if config.sticky.key.is_none() {
            tracing::warn!("No sticky.key configured; sticky cookies use an all-zero key");
        }
        let settings = ServerSettings {
            http_address: config.listener.http_address.clone(),
            https_address: config.listener.https_address.clone(),
            backlog: config.listener.backlog,
            connect_timeout: config.connect_timeout(),
            sticky_key: sticky_key(&config)?,
            default_key_pair: default_key_pair(&config)?.map(Arc::new),
        };

        let server = Arc::new(HttpServer::new(settings, store, Arc::new(discovery.clone())));
        server.start().await?;
        metrics::set_route_count(server.table().len());

        let shutdown = Shutdown::new();
        let admin_addr = if config.admin.enabled {
            Some(start_admin(&config.admin, server.clone(), &shutdown).await?)
        } else {
            None
        };

        Ok(Self {
            server,
            discovery,
            config,
            shutdown,
            admin_addr,
        })
    }

    pub fn server(&self) -> &Arc<HttpServer> {
        &self.server
    }

    pub fn discovery(&self) -> &StaticDiscovery {
        &self.discovery
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Apply a reloaded configuration to routes and address lists.
    pub async fn reload(&mut self, next: ProxyConfig) -> Result<(), ConfigError> {
        apply_reload(&self.config, &next, &self.discovery, &self.server).await?;
        if next.listener != self.config.listener || next.admin != self.config.admin {
            tracing::warn!("Listener and admin settings only take effect on restart");
        }
        self.config = next;
        Ok(())
    }

    /// Stop the admin API and close the proxy.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        self.server.close();
    }
}

async fn start_admin(
    config: &AdminConfig,
    server: Arc<HttpServer>,
    shutdown: &Shutdown,
) -> Result<SocketAddr, StartupError> {
    let bind_error = |source| StartupError::Admin {
        addr: config.bind_address.clone(),
        source,
    };
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(bind_error)?;
    let addr = listener.local_addr().map_err(bind_error)?;

    let capabilities = Capabilities::for_mode(config.read_only);
    let router = setup_admin_router(AdminState::new(server, &config.api_key), capabilities);
    let stop = shutdown.wait();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(stop).await {
            tracing::error!(error = %e, "Admin API stopped with error");
        }
    });

    tracing::info!(address = %addr, read_only = config.read_only, "Admin API listening");
    Ok(addr)
}
