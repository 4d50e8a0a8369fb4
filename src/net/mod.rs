//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address
//!     → listener.rs (reuse-port bind, one socket per scheme)
//!     → tls.rs (TLS listener only: SNI → route key pair or default)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Both listeners allow port reuse so a replacement process can bind
//!   before the old one exits
//! - The TLS listener carries no fixed certificate; selection is per handshake

pub mod listener;
pub mod tls;

pub use listener::{bind_reusable, ListenerError, ListenerInfo, Scheme};
