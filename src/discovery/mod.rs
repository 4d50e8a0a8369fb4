//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Route table creates a Service
//!     → Discovery::open(service name)
//!     → AddressCache (live backend addresses, may change at any time)
//!     → read by the proxy on every request
//!     → closed when the last route referencing the service goes away
//! ```
//!
//! # Design Decisions
//! - Address lists are snapshots; callers may reorder their copy freely
//! - An empty list is a valid state (the proxy answers 503)
//! - Opening a cache may fail and aborts the route mutation that asked for it

pub mod static_cache;

use std::sync::Arc;

use thiserror::Error;

pub use static_cache::{StaticAddressCache, StaticDiscovery};

/// Failure to open an address cache.
#[derive(Debug, Error)]
#[error("discovery: cannot open address cache for service {service}: {reason}")]
pub struct DiscoveryError {
    pub service: String,
    pub reason: String,
}

/// Live membership view of one service's backend addresses.
pub trait AddressCache: Send + Sync {
    /// Current backend addresses (`host:port`), possibly empty.
    fn addrs(&self) -> Vec<String>;

    /// Release discovery resources held by this cache.
    fn close(&self);
}

/// Opens address caches by service name.
pub trait Discovery: Send + Sync {
    fn open(&self, service: &str) -> Result<Arc<dyn AddressCache>, DiscoveryError>;
}
