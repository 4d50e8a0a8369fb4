//! Route definitions and identity.
//!
//! A route binds a (possibly wildcard) domain to a backend service. Its ID is a
//! content hash of the domain, so submitting the same domain twice always
//! lands on the same record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A route as held by the route store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Derived from the domain, never client supplied.
    #[serde(default)]
    pub id: String,

    /// Host name to match. Case-insensitive; `*.` prefix for wildcards.
    pub domain: String,

    /// Name of the backend service.
    pub service: String,

    /// Pin clients to one backend via an encrypted cookie.
    #[serde(default)]
    pub sticky: bool,

    /// PEM-encoded certificate chain presented for this domain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_cert: String,

    /// PEM-encoded private key for `tls_cert`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_key: String,

    /// Opaque reference to whatever owns the route (an app, a deployment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<String>,
}

impl Route {
    /// Create a route for `domain` served by `service`.
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            id: route_id(&domain),
            domain,
            service: service.into(),
            ..Self::default()
        }
    }

    /// Enable sticky sessions.
    pub fn sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// Attach a PEM certificate chain and private key.
    pub fn with_tls(mut self, cert_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        self.tls_cert = cert_pem.into();
        self.tls_key = key_pem.into();
        self
    }

    /// Recompute the ID from the domain.
    pub fn assign_id(&mut self) {
        self.id = route_id(&self.domain);
    }

    /// Whether the route carries both halves of a key pair.
    pub fn has_tls(&self) -> bool {
        !self.tls_cert.is_empty() && !self.tls_key.is_empty()
    }

    /// Copy of the route with TLS material removed.
    pub fn redacted(&self) -> Self {
        Self {
            tls_cert: String::new(),
            tls_key: String::new(),
            ..self.clone()
        }
    }
}

/// Derive a route ID from its domain (hex SHA-256 of the normalized form).
pub fn route_id(domain: &str) -> String {
    hex::encode(Sha256::digest(normalize_domain(domain).as_bytes()))
}

/// Canonical form of a route domain: lowercase, no trailing dot.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase().trim_end_matches('.').to_string()
}

/// Normalize a host name for lookup.
///
/// - Strip a `:port` suffix (bracketed IPv6 literals keep their address)
/// - Convert to lowercase
/// - Trim a trailing dot
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &rest[..end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            // More than one colon is a bare IPv6 literal, not host:port.
            Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
                name
            }
            _ => host,
        }
    };
    without_port.to_lowercase().trim_end_matches('.').to_string()
}
