//! Error responses written by the proxy itself.
//!
//! # Design Decisions
//! - Body is the status text plus a newline, with an explicit Content-Length
//! - Failures on the raw-bridge path also close the client connection

use axum::body::Body;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Response, StatusCode};

/// Minimal plain-text response for `status`.
pub fn fail(status: StatusCode) -> Response<Body> {
    let text = format!("{}\n", status.canonical_reason().unwrap_or("Error"));
    let mut response = Response::new(Body::from(text.clone()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(text.len()));
    response
}

/// Like [`fail`], and asks the client to drop the connection.
pub fn fail_and_close(status: StatusCode) -> Response<Body> {
    let mut response = fail(status);
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
