//! Protocol upgrade forwarding (WebSocket and friends).
//!
//! # Data Flow
//! ```text
//! Client ──Upgrade request──▶ Proxy ──dial (retry)──▶ Backend
//! Client ◀──backend response (hop headers stripped, maybe Set-Cookie)── Proxy
//!
//! on 101:
//! Client ◀════════ raw bytes ════════▶ Proxy ◀════════ raw bytes ════════▶ Backend
//! ```
//!
//! # Design Decisions
//! - Bytes are copied, not frames; any upgraded protocol passes through
//! - EOF on one side half-closes the other; an error tears down both
//! - Every failure answers 503 with `Connection: close`

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::http::proxy::{dial_first, Candidates, Forwarding, ProxyError};
use crate::http::response::fail_and_close;
use crate::http::{headers, request};
use crate::observability::metrics;
use crate::routing::RouteEntry;

/// Forward an upgrade request and, on `101 Switching Protocols`, bridge the
/// two connections.
pub async fn forward(
    entry: Arc<RouteEntry>,
    mut client_request: Request<Body>,
    candidates: Candidates,
    fwd: Forwarding,
    start: Instant,
) -> Response<Body> {
    let service = entry.service().clone();
    let client_upgrade = hyper::upgrade::on(&mut client_request);

    let version = client_request.version();
    let (mut parts, body) = client_request.into_parts();
    headers::strip_upgrade_request(&mut parts.headers, version);
    headers::set_forwarded(&mut parts.headers, fwd.client.ip(), fwd.listener);
    let outbound = request::outbound(parts, body);

    let failed = |e: ProxyError| {
        tracing::warn!(service = %service.name(), error = %e, "Upgrade request failed");
        metrics::record_request(StatusCode::SERVICE_UNAVAILABLE.as_u16(), service.name(), start);
        fail_and_close(StatusCode::SERVICE_UNAVAILABLE)
    };

    let (backend, stream) =
        match dial_first(service.name(), &candidates.addrs, fwd.connect_timeout).await {
            Ok(dialed) => dialed,
            Err(e) => return failed(e),
        };
    let transport = |source| ProxyError::Transport {
        addr: backend.clone(),
        source,
    };

    let (mut sender, conn) = match hyper::client::conn::http1::handshake(TokioIo::new(stream)).await {
        Ok(handshake) => handshake,
        Err(e) => return failed(transport(e)),
    };
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "Backend upgrade connection closed with error");
        }
    });

    let mut response = match sender.send_request(outbound).await {
        Ok(response) => response,
        Err(e) => return failed(transport(e)),
    };

    headers::strip_upgrade_response(response.headers_mut());
    if entry.sticky() && candidates.pinned.as_deref() != Some(backend.as_str()) {
        let sealed = service.codec().encode(&backend);
        headers::set_sticky_cookie(response.headers_mut(), &sealed);
    }
    metrics::record_request(response.status().as_u16(), service.name(), start);

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        let (parts, body) = response.into_parts();
        return Response::from_parts(parts, Body::new(body));
    }

    let backend_upgrade = hyper::upgrade::on(&mut response);
    let service_name = service.name().to_string();
    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok((client, upstream)) => {
                metrics::record_upgrade(&service_name);
                tracing::debug!(service = %service_name, backend = %backend, "Raw bridge open");
                if let Err(e) = bridge(TokioIo::new(client), TokioIo::new(upstream)).await {
                    tracing::debug!(service = %service_name, error = %e, "Raw bridge closed with error");
                }
            }
            Err(e) => {
                tracing::debug!(service = %service_name, error = %e, "Upgrade did not complete");
            }
        }
    });

    let (parts, _) = response.into_parts();
    Response::from_parts(parts, Body::empty())
}

enum Side {
    Upstream,
    Downstream,
}

fn joined(result: Result<std::io::Result<u64>, tokio::task::JoinError>) -> std::io::Result<u64> {
    result.unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

/// Copy bytes both ways until both directions finish.
///
/// A clean EOF shuts down the write half of the opposite side and leaves the
/// other direction running. The first error aborts the other direction.
pub async fn bridge<C, B>(client: C, backend: B) -> std::io::Result<()>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

    let mut upstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut client_rd, &mut backend_wr).await?;
        backend_wr.shutdown().await?;
        Ok::<_, std::io::Error>(copied)
    });
    let mut downstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut backend_rd, &mut client_wr).await?;
        client_wr.shutdown().await?;
        Ok::<_, std::io::Error>(copied)
    });

    let (side, first) = tokio::select! {
        r = &mut upstream => (Side::Upstream, r),
        r = &mut downstream => (Side::Downstream, r),
    };
    let other = match side {
        Side::Upstream => downstream,
        Side::Downstream => upstream,
    };

    match joined(first) {
        Ok(_) => joined(other.await).map(|_| ()),
        Err(e) => {
            other.abort();
            Err(e)
        }
    }
}
