//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, Host → RouteEntry)
//!     → request.rs (request ID, origin-form rebuild)
//!     → proxy.rs (candidate order, dial retry, HTTP/1.1 exchange)
//!         └─ upgrade.rs (101 → raw byte bridge)
//!     → headers.rs (hop-by-hop policy, X-Forwarded-*, sticky cookie)
//!     → response.rs (proxy-generated error responses)
//!     → Send to client
//! ```

pub mod headers;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod upgrade;

pub use proxy::ProxyError;
pub use request::{X_REQUEST_ID, X_REQUEST_START};
pub use server::{HttpServer, ServerSettings};
