//! TLS configuration and per-connection certificate selection.
//!
//! The TLS listener has no fixed certificate. On each handshake the SNI host
//! is resolved against the route table (exact, then wildcard). A route with a
//! key pair presents it; otherwise the configured default is used; with
//! neither the handshake is aborted.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;

use crate::routing::RouteTable;

/// Errors from loading or parsing TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls: failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls: invalid certificate PEM: {0}")]
    Certificate(String),

    #[error("tls: invalid private key PEM: {0}")]
    PrivateKey(String),

    #[error("tls: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Crypto provider used for every server config and key in the process.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Parse a PEM certificate chain and private key into a signing key pair.
pub fn parse_key_pair(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate("no certificates found".to_string()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| TlsError::PrivateKey(e.to_string()))?
        .ok_or_else(|| TlsError::PrivateKey("no private key found".to_string()))?;

    let signing_key = provider().key_provider.load_private_key(key)?;
    Ok(CertifiedKey::new(certs, signing_key))
}

/// Load a key pair from PEM files on disk.
pub fn load_key_pair(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let read = |path: &Path| {
        fs::read(path).map_err(|source| TlsError::Read {
            path: path.display().to_string(),
            source,
        })
    };
    parse_key_pair(&read(cert_path)?, &read(key_path)?)
}

/// Chooses the certificate for each handshake from the route table.
#[derive(Debug)]
pub struct SniResolver {
    table: Arc<RouteTable>,
    default: Option<Arc<CertifiedKey>>,
}

impl SniResolver {
    pub fn new(table: Arc<RouteTable>, default: Option<Arc<CertifiedKey>>) -> Self {
        Self { table, default }
    }

    /// Certificate for `server_name`, falling back to the default.
    pub fn certificate_for(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let from_route = server_name
            .and_then(|name| self.table.resolve(name))
            .and_then(|entry| entry.key_pair());

        let chosen = from_route.or_else(|| self.default.clone());
        if chosen.is_none() {
            tracing::warn!(
                server_name = server_name.unwrap_or(""),
                "Aborting handshake: missing TLS configuration"
            );
        }
        chosen
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.certificate_for(hello.server_name())
    }
}

/// Build the TLS listener's server config around an [`SniResolver`].
pub fn server_config(resolver: SniResolver) -> Result<ServerConfig, TlsError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
