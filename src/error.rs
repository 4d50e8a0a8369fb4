//! Error types shared by the route table, the route store and the listener.

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::net::tls::TlsError;

/// Errors surfaced by route mutation and listener lifecycle operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The listener has been closed; no further mutation or forwarding happens.
    #[error("router: listener has been closed")]
    Closed,

    /// `start` was called on a listener that is already running.
    #[error("router: http listener already started")]
    AlreadyStarted,

    /// No route with the given ID exists.
    #[error("router: route not found: {0}")]
    NotFound(String),

    /// A route with the given ID already exists.
    #[error("router: route already exists: {0}")]
    Conflict(String),

    /// The address cache for a service could not be opened.
    #[error("router: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The TLS material attached to a route could not be parsed.
    #[error("router: {0}")]
    Tls(#[from] TlsError),

    /// A listener socket could not be bound.
    #[error("router: failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The route store failed to deliver its initial snapshot.
    #[error("router: route store sync failed: {0}")]
    Sync(String),
}
