//! hostgate: a dynamic HTTP/HTTPS reverse proxy.
//!
//! Routes map host names (exact or `*.` wildcard) to backend services. They
//! live in a route store and are synced into an in-memory route table while
//! the proxy runs; every request is resolved against the table by its Host
//! header, every TLS handshake by its SNI name.

// Core subsystems
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;
pub mod sticky;
pub mod store;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use error::RouterError;
pub use http::{HttpServer, ServerSettings};
pub use lifecycle::{Gateway, Shutdown};
pub use routing::Route;
