//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route store notification (Set / Remove)
//!     → sync.rs (parse TLS material, single writer)
//!     → table.rs (exclusive lock: ID index, domain index, service refcounts)
//!     → watch.rs (fire-and-forget change event)
//!
//! Incoming request / TLS handshake
//!     → table.rs resolve(host) under a shared lock
//!     → exact domain, then wildcard suffixes, most specific first
//!     → RouteEntry (service, sticky flag, key pair)
//! ```
//!
//! # Design Decisions
//! - One read/write lock guards every map; the maps are never handed out
//! - Services are reference counted by the routes that point at them and
//!   only ever created or destroyed as a side effect of route changes
//! - No lock is held across network I/O: callers clone the entry and go

pub mod route;
pub mod sync;
pub mod table;
pub mod watch;

pub use route::{normalize_domain, normalize_host, route_id, Route};
pub use sync::{route_key_pair, TableSyncHandler};
pub use table::{RouteEntry, RouteTable, Service, TableSnapshot};
pub use watch::{Event, EventKind, WatchManager};
