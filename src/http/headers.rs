//! Hop-by-hop header policy, forwarding headers and cookies.
//!
//! # Hop-by-hop rules
//! ```text
//! always stripped:        Te, Trailers, Transfer-Encoding
//! stripped when listed:   every token named in Connection
//! Upgrade:                kept only on HTTP/1.1+ when Connection lists "upgrade"
//! Connection:             stripped on plain requests, kept on upgrade requests
//! ```

use std::net::IpAddr;

use axum::http::header::{CONNECTION, COOKIE, SET_COOKIE, UPGRADE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::net::ListenerInfo;
use crate::sticky::STICKY_COOKIE;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// Stripped from every forwarded request and response.
pub const ALWAYS_HOP_HEADERS: [HeaderName; 3] = [
    HeaderName::from_static("te"),
    HeaderName::from_static("trailers"),
    HeaderName::from_static("transfer-encoding"),
];

/// Tokens listed in every `Connection` header, trimmed and lower-cased.
pub fn connection_options(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|opt| opt.trim().to_ascii_lowercase())
        .filter(|opt| !opt.is_empty())
        .collect()
}

pub fn wants_upgrade(options: &[String]) -> bool {
    options.iter().any(|opt| opt == "upgrade")
}

fn remove_always_hop(headers: &mut HeaderMap) {
    for name in &ALWAYS_HOP_HEADERS {
        headers.remove(name);
    }
}

fn remove_listed(headers: &mut HeaderMap, options: &[String]) {
    for opt in options {
        if let Ok(name) = HeaderName::from_bytes(opt.as_bytes()) {
            headers.remove(name);
        }
    }
}

/// Prepare the headers of a plain (non-upgrade) request for the backend.
pub fn strip_request(headers: &mut HeaderMap, version: Version) {
    let options = connection_options(headers);
    if version < Version::HTTP_11 || !wants_upgrade(&options) {
        headers.remove(UPGRADE);
    }
    remove_always_hop(headers);
    remove_listed(headers, &options);
    headers.remove(CONNECTION);
}

/// Prepare the headers of an upgrade request. `Connection` and, on
/// HTTP/1.1+, `Upgrade` survive.
pub fn strip_upgrade_request(headers: &mut HeaderMap, version: Version) {
    if version < Version::HTTP_11 {
        headers.remove(UPGRADE);
    }
    remove_always_hop(headers);
}

/// Prepare a plain backend response for the client.
pub fn strip_response(headers: &mut HeaderMap, request_version: Version) {
    let options = connection_options(headers);
    if request_version < Version::HTTP_11 || !wants_upgrade(&options) {
        headers.remove(UPGRADE);
    }
    remove_always_hop(headers);
    remove_listed(headers, &options);
    headers.remove(CONNECTION);
}

/// Prepare the backend's answer to an upgrade request for the client.
pub fn strip_upgrade_response(headers: &mut HeaderMap) {
    if !wants_upgrade(&connection_options(headers)) {
        headers.remove(UPGRADE);
    }
    remove_always_hop(headers);
}

/// Add `X-Forwarded-For` (appended to any existing chain),
/// `X-Forwarded-Proto` and `X-Forwarded-Port`.
pub fn set_forwarded(headers: &mut HeaderMap, client: IpAddr, listener: ListenerInfo) {
    let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, client),
        _ => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(listener.scheme.as_str()),
    );
    headers.insert(X_FORWARDED_PORT, HeaderValue::from(listener.port));
}

/// Value of the cookie `name`, if the request carries it.
pub fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
}

/// Append a `Set-Cookie` pinning the client to the sealed backend value.
pub fn set_sticky_cookie(headers: &mut HeaderMap, sealed: &str) {
    let cookie = format!("{}={}; Path=/", STICKY_COOKIE, sealed);
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => tracing::warn!(error = %e, "Sticky cookie is not a valid header value"),
    }
}
