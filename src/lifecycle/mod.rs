//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → address lists + route store → listeners → admin API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → admin stops → listeners close → caches close → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Reload never rebinds listeners

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{next_signal, Signal};
pub use startup::{Gateway, StartupError};
