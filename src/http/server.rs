//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Own the route table and keep it synced from the route store
//! - Bind and serve the plaintext and TLS listeners
//! - Dispatch every request to the route its Host resolves to
//! - Route mutation entry points (add/set/remove/get/list)
//! - Orderly close: caches, listeners, store subscription

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use rustls::sign::CertifiedKey;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::discovery::Discovery;
use crate::error::RouterError;
use crate::http::proxy::{self, Forwarding};
use crate::http::request;
use crate::http::response::fail;
use crate::net::tls::{self, SniResolver};
use crate::net::{bind_reusable, ListenerInfo, Scheme};
use crate::routing::{route_key_pair, Event, Route, RouteTable, TableSyncHandler, WatchManager};
use crate::sticky::{StickyCodec, KEY_LEN};
use crate::store::{RouteStore, SyncHandler};

/// Listener settings for [`HttpServer`].
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub http_address: String,
    pub https_address: String,
    pub backlog: u32,
    pub connect_timeout: Duration,
    pub sticky_key: [u8; KEY_LEN],
    /// Presented when no route certificate matches the SNI host.
    pub default_key_pair: Option<Arc<CertifiedKey>>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0:8080".to_string(),
            https_address: "0.0.0.0:8443".to_string(),
            backlog: 1024,
            connect_timeout: Duration::from_secs(1),
            sticky_key: [0u8; KEY_LEN],
            default_key_pair: None,
        }
    }
}

/// State injected into the proxy handler, one per listener.
#[derive(Clone)]
struct ProxyState {
    table: Arc<RouteTable>,
    listener: ListenerInfo,
    connect_timeout: Duration,
}

struct Running {
    http: Handle,
    https: Handle,
    http_addr: SocketAddr,
    https_addr: SocketAddr,
}

/// The dynamic HTTP/HTTPS listener pair.
pub struct HttpServer {
    settings: ServerSettings,
    table: Arc<RouteTable>,
    store: Arc<dyn RouteStore>,
    watch: WatchManager,
    started: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl HttpServer {
    pub fn new(
        settings: ServerSettings,
        store: Arc<dyn RouteStore>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let codec = StickyCodec::new(&settings.sticky_key);
        Self {
            table: Arc::new(RouteTable::new(discovery, codec)),
            settings,
            store,
            watch: WatchManager::default(),
            started: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    /// Sync routes from the store, then bind and serve both listeners.
    ///
    /// Returns once both sockets are accepting. Any failure stops the store
    /// subscription and leaves the server startable again.
    pub async fn start(&self) -> Result<(), RouterError> {
        if self.table.is_closed() {
            return Err(RouterError::Closed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyStarted);
        }

        let result = self.launch().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Listener start failed");
            self.store.stop_sync();
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn launch(&self) -> Result<(), RouterError> {
        let handler: Arc<dyn SyncHandler> =
            Arc::new(TableSyncHandler::new(self.table.clone(), self.watch.clone()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let store = self.store.clone();
        tokio::spawn(async move { store.sync(handler, ready_tx).await });

        ready_rx.await.map_err(|_| {
            RouterError::Sync("route store sync ended before it was ready".to_string())
        })??;
        if self.table.is_closed() {
            return Err(RouterError::Closed);
        }

        let bind = |addr: &str| {
            let bind_error = |source: std::io::Error| RouterError::Bind {
                addr: addr.to_string(),
                source,
            };
            let listener = bind_reusable(addr, self.settings.backlog)
                .map_err(|e| bind_error(e.into()))?;
            let local = listener.local_addr().map_err(bind_error)?;
            Ok::<_, RouterError>((listener, local))
        };
        let (http, http_addr) = bind(&self.settings.http_address)?;
        let (https, https_addr) = bind(&self.settings.https_address)?;

        let resolver = SniResolver::new(self.table.clone(), self.settings.default_key_pair.clone());
        let tls_config = RustlsConfig::from_config(Arc::new(tls::server_config(resolver)?));

        let http_handle = Handle::new();
        let https_handle = Handle::new();

        let app = self.app(Scheme::Http, http_addr.port());
        let server = axum_server::from_tcp(http).handle(http_handle.clone());
        tokio::spawn(async move {
            if let Err(e) = server
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                tracing::error!(error = %e, "HTTP listener stopped with error");
            }
        });

        let app = self.app(Scheme::Https, https_addr.port());
        let server = axum_server::from_tcp_rustls(https, tls_config).handle(https_handle.clone());
        tokio::spawn(async move {
            if let Err(e) = server
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                tracing::error!(error = %e, "HTTPS listener stopped with error");
            }
        });

        let mut running = self.running.lock().expect("server state poisoned");
        if self.table.is_closed() {
            http_handle.shutdown();
            https_handle.shutdown();
            return Err(RouterError::Closed);
        }
        *running = Some(Running {
            http: http_handle,
            https: https_handle,
            http_addr,
            https_addr,
        });
        drop(running);

        tracing::info!(
            http_address = %http_addr,
            https_address = %https_addr,
            routes = self.table.len(),
            "Listeners started"
        );
        Ok(())
    }

    fn app(&self, scheme: Scheme, port: u16) -> Router {
        let state = ProxyState {
            table: self.table.clone(),
            listener: ListenerInfo { scheme, port },
            connect_timeout: self.settings.connect_timeout,
        };
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Close address caches, both listeners and the store subscription.
    /// Safe to call more than once.
    pub fn close(&self) {
        if !self.table.close() {
            return;
        }
        if let Some(running) = self.running.lock().expect("server state poisoned").take() {
            running.http.shutdown();
            running.https.shutdown();
        }
        self.store.stop_sync();
        tracing::info!("Listeners closed");
    }

    /// Plaintext listener address once started.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .expect("server state poisoned")
            .as_ref()
            .map(|r| r.http_addr)
    }

    /// TLS listener address once started.
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .expect("server state poisoned")
            .as_ref()
            .map(|r| r.https_addr)
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Subscribe to route table change events.
    pub fn watch(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.watch.subscribe()
    }

    fn ensure_open(&self) -> Result<(), RouterError> {
        if self.table.is_closed() {
            Err(RouterError::Closed)
        } else {
            Ok(())
        }
    }

    /// Assign the ID and reject anything the route table would refuse, so the
    /// store never holds a route that cannot serve.
    fn admit(&self, route: &mut Route) -> Result<(), RouterError> {
        self.ensure_open()?;
        route.assign_id();
        route_key_pair(route)?;
        self.table.check_service(&route.service)
    }

    /// Store a new route. Fails if a route for the same domain exists.
    pub async fn add_route(&self, mut route: Route) -> Result<Route, RouterError> {
        self.admit(&mut route)?;
        self.store.add(route.clone()).await?;
        Ok(route.redacted())
    }

    /// Store a route, replacing any existing one for the same domain.
    pub async fn set_route(&self, mut route: Route) -> Result<Route, RouterError> {
        self.admit(&mut route)?;
        self.store.set(route.clone()).await?;
        Ok(route.redacted())
    }

    pub async fn remove_route(&self, id: &str) -> Result<(), RouterError> {
        self.ensure_open()?;
        self.store.remove(id).await
    }

    pub async fn get_route(&self, id: &str) -> Result<Route, RouterError> {
        self.ensure_open()?;
        Ok(self.store.get(id).await?.redacted())
    }

    pub async fn list_routes(&self) -> Result<Vec<Route>, RouterError> {
        self.ensure_open()?;
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(Route::redacted)
            .collect())
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolve the Host and forward.
async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    if state.table.is_closed() {
        return fail(StatusCode::SERVICE_UNAVAILABLE);
    }

    let host = request::host(&request).unwrap_or_default().to_string();
    let Some(entry) = state.table.resolve(&host) else {
        tracing::warn!(host = %host, path = %request.uri().path(), "No route matched");
        return fail(StatusCode::NOT_FOUND);
    };

    let fwd = Forwarding {
        client,
        listener: state.listener,
        connect_timeout: state.connect_timeout,
    };
    proxy::serve(entry, request, fwd).await
}
