//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use hostgate::discovery::StaticDiscovery;
use hostgate::http::{HttpServer, ServerSettings};
use hostgate::routing::Route;
use hostgate::store::MemoryRouteStore;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const STICKY_KEY: [u8; 32] = [9u8; 32];

/// Proxy under test with both listeners on ephemeral ports.
pub struct TestProxy {
    pub server: Arc<HttpServer>,
    pub discovery: StaticDiscovery,
    pub http_addr: SocketAddr,
    pub https_addr: SocketAddr,
}

pub fn test_settings() -> ServerSettings {
    ServerSettings {
        http_address: "127.0.0.1:0".to_string(),
        https_address: "127.0.0.1:0".to_string(),
        backlog: 128,
        connect_timeout: Duration::from_millis(500),
        sticky_key: STICKY_KEY,
        default_key_pair: None,
    }
}

pub async fn start_proxy() -> TestProxy {
    start_proxy_with(test_settings(), Vec::new()).await
}

/// Start a proxy whose store is seeded with `routes`.
pub async fn start_proxy_with(settings: ServerSettings, routes: Vec<Route>) -> TestProxy {
    let discovery = StaticDiscovery::new();
    let store = Arc::new(MemoryRouteStore::with_routes(routes));
    let server = Arc::new(HttpServer::new(settings, store, Arc::new(discovery.clone())));
    server.start().await.unwrap();
    TestProxy {
        http_addr: server.addr().unwrap(),
        https_addr: server.tls_addr().unwrap(),
        server,
        discovery,
    }
}

impl TestProxy {
    /// HTTP client resolving every domain in `domains` to the proxy.
    pub fn client(&self, domains: &[&str]) -> reqwest::Client {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5));
        for domain in domains {
            builder = builder.resolve(domain, self.http_addr);
        }
        builder.build().unwrap()
    }

    pub fn url(&self, domain: &str, path: &str) -> String {
        format!("http://{}:{}{}", domain, self.http_addr.port(), path)
    }

    /// Set a route and wait until the table serves it.
    pub async fn set_route(&self, route: Route) {
        let domain = route.domain.replace("*.", "probe.");
        let id = route.id.clone();
        let service = route.service.clone();
        self.server.set_route(route).await.unwrap();
        let table = self.server.table().clone();
        wait_until(move || {
            table
                .resolve(&domain)
                .is_some_and(|e| e.id() == id && e.service().name() == service)
        })
        .await;
    }

    /// Remove a route and wait until the table drops it.
    pub async fn remove_route(&self, id: &str) {
        self.server.remove_route(id).await.unwrap();
        let table = self.server.table().clone();
        let id = id.to_string();
        wait_until(move || table.get(&id).is_none()).await;
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// An address nothing listens on.
pub async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// Backend answering every request with a JSON description of it.
///
/// ```json
/// {"backend": "<name>", "method": "GET", "uri": "/p?q", "headers": {...}}
/// ```
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move |request: Request<Body>| async move {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in request.headers() {
            let v = v.to_str().unwrap_or("").to_string();
            headers
                .entry(k.as_str().to_string())
                .and_modify(|prior| {
                    prior.push_str(", ");
                    prior.push_str(&v);
                })
                .or_insert(v);
        }
        axum::Json(json!({
            "backend": name,
            "method": request.method().as_str(),
            "uri": request.uri().to_string(),
            "headers": headers,
        }))
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a simple mock backend that writes `response` verbatim to every
/// connection after reading the request head.
pub async fn start_raw_backend(response: String) -> SocketAddr {
    start_programmable_backend(move || {
        let response = response.clone();
        async move { response }
    })
    .await
}

/// Start a raw backend whose reply is produced per connection.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let response = f().await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// WebSocket backend echoing every text and binary message.
pub async fn start_websocket_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    } else if msg.is_close() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Read up to the end of the request head.
pub async fn read_head<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    head
}

/// Write a raw request to `addr` and return the whole response text.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// Parse an echo backend reply.
pub async fn echo(response: reqwest::Response) -> Value {
    response.json().await.unwrap()
}
