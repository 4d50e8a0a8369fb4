//! Request identification and outbound request construction.
//!
//! # Responsibilities
//! - Stamp `X-Request-Start` and `X-Request-Id` on every proxied request
//! - Extract the host used for route lookup
//! - Rebuild the request in origin form for the backend
//!
//! # Design Decisions
//! - The client's method, path, query, Host and body are forwarded untouched
//! - Backends are always spoken to over HTTP/1.1

use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Request, Uri, Version};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_REQUEST_START: HeaderName = HeaderName::from_static("x-request-start");

/// Overwrite the request ID and start time; returns the new ID.
pub fn stamp(request: &mut Request<Body>) -> String {
    let request_id = Uuid::new_v4().to_string();
    let started_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let headers = request.headers_mut();
    headers.insert(X_REQUEST_START, HeaderValue::from(started_ms as u64));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    request_id
}

/// Host the client asked for: the `Host` header, else the URI authority.
pub fn host(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
}

/// Origin-form URI (`/path?query`) of the client request.
pub fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse()
        .unwrap_or_else(|_| Uri::from_static("/"))
}

/// Rebuild `parts` as an HTTP/1.1 origin-form request carrying `body`.
pub fn outbound(mut parts: Parts, body: Body) -> Request<Body> {
    parts.uri = origin_form(&parts.uri);
    parts.version = Version::HTTP_11;
    Request::from_parts(parts, body)
}
