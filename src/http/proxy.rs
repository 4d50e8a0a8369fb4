//! Request forwarding.
//!
//! # Data Flow
//! ```text
//! RouteEntry + client request
//!     → stamp X-Request-Start / X-Request-Id
//!     → candidates: shuffled live addresses, sticky backend first
//!     → Connection lists "upgrade"? → upgrade.rs
//!     → strip hop-by-hop headers, add X-Forwarded-*
//!     → dial candidates in order (dial failures fall through)
//!     → HTTP/1.1 exchange on the first connection that opens
//!     → strip response hop headers, maybe Set-Cookie, stream body back
//! ```
//!
//! # Design Decisions
//! - Only connection establishment is retried. Once a request has been
//!   written to a backend any failure is final.
//! - One backend connection per request; the response body streams straight
//!   from the backend socket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::http::response::fail;
use crate::http::{headers, request, upgrade};
use crate::net::ListenerInfo;
use crate::observability::metrics;
use crate::routing::{RouteEntry, Service};
use crate::sticky::STICKY_COOKIE;

/// Errors while forwarding. Every variant becomes a 503 for the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no backends available for service {0}")]
    NoBackends(String),

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: hyper::Error,
    },
}

/// Connection facts the proxy needs about the client side.
#[derive(Debug, Clone, Copy)]
pub struct Forwarding {
    pub client: SocketAddr,
    pub listener: ListenerInfo,
    pub connect_timeout: Duration,
}

/// Backends to try, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub addrs: Vec<String>,
    /// Backend named by a valid sticky cookie, already at the front of `addrs`.
    pub pinned: Option<String>,
}

/// Shuffle the service's live addresses, moving the sticky backend first.
pub fn candidates(service: &Service, request_headers: &HeaderMap, sticky: bool) -> Candidates {
    let mut addrs = service.addrs();
    addrs.shuffle(&mut rand::thread_rng());

    let pinned = if sticky {
        headers::cookie(request_headers, STICKY_COOKIE)
            .and_then(|value| service.codec().preferred(value, &addrs))
    } else {
        None
    };
    if let Some(i) = pinned.as_ref().and_then(|p| addrs.iter().position(|a| a == p)) {
        addrs[..=i].rotate_right(1);
    }
    Candidates { addrs, pinned }
}

/// Open a TCP connection to `addr` within `timeout`.
pub async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let dial_error = |source| ProxyError::Dial {
        addr: addr.to_string(),
        source,
    };
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(dial_error(e)),
        Err(_) => {
            return Err(dial_error(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            )))
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(backend = %addr, error = %e, "Failed to set TCP_NODELAY");
    }
    Ok(stream)
}

/// Dial `addrs` in order until one accepts.
///
/// Returns the last dial error when every candidate fails.
pub async fn dial_first(
    service: &str,
    addrs: &[String],
    timeout: Duration,
) -> Result<(String, TcpStream), ProxyError> {
    let mut last = None;
    for addr in addrs {
        match dial(addr, timeout).await {
            Ok(stream) => return Ok((addr.clone(), stream)),
            Err(e) => {
                tracing::debug!(service = %service, backend = %addr, error = %e, "Dial failed, trying next backend");
                metrics::record_dial_failure(service);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| ProxyError::NoBackends(service.to_string())))
}

async fn round_trip(
    service: &str,
    addrs: &[String],
    outbound: Request<Body>,
    timeout: Duration,
) -> Result<(String, Response<Incoming>), ProxyError> {
    let (addr, stream) = dial_first(service, addrs, timeout).await?;
    let transport = |source| ProxyError::Transport {
        addr: addr.clone(),
        source,
    };

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(transport)?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Backend connection closed with error");
        }
    });

    let response = sender.send_request(outbound).await.map_err(transport)?;
    Ok((addr, response))
}

/// Forward `request` to the service behind `entry`.
pub async fn serve(entry: Arc<RouteEntry>, mut request: Request<Body>, fwd: Forwarding) -> Response<Body> {
    let start = Instant::now();
    let request_id = request::stamp(&mut request);
    let service = entry.service().clone();

    let candidates = candidates(&service, request.headers(), entry.sticky());
    if candidates.addrs.is_empty() {
        tracing::warn!(
            request_id = %request_id,
            domain = %entry.domain(),
            service = %service.name(),
            "No backends found"
        );
        metrics::record_request(StatusCode::SERVICE_UNAVAILABLE.as_u16(), service.name(), start);
        return fail(StatusCode::SERVICE_UNAVAILABLE);
    }

    if headers::wants_upgrade(&headers::connection_options(request.headers())) {
        return upgrade::forward(entry, request, candidates, fwd, start).await;
    }

    let version = request.version();
    let (mut parts, body) = request.into_parts();
    headers::strip_request(&mut parts.headers, version);
    headers::set_forwarded(&mut parts.headers, fwd.client.ip(), fwd.listener);
    let outbound = request::outbound(parts, body);

    let (backend, response) =
        match round_trip(service.name(), &candidates.addrs, outbound, fwd.connect_timeout).await {
            Ok(exchange) => exchange,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    service = %service.name(),
                    error = %e,
                    "Proxy request failed"
                );
                metrics::record_request(StatusCode::SERVICE_UNAVAILABLE.as_u16(), service.name(), start);
                return fail(StatusCode::SERVICE_UNAVAILABLE);
            }
        };

    let (mut parts, body) = response.into_parts();
    headers::strip_response(&mut parts.headers, version);
    if entry.sticky() && candidates.pinned.as_deref() != Some(backend.as_str()) {
        headers::set_sticky_cookie(&mut parts.headers, &service.codec().encode(&backend));
    }

    tracing::debug!(
        request_id = %request_id,
        service = %service.name(),
        backend = %backend,
        status = parts.status.as_u16(),
        "Proxied request"
    );
    metrics::record_request(parts.status.as_u16(), service.name(), start);
    Response::from_parts(parts, Body::new(body))
}
