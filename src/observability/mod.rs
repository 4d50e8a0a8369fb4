//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (JSON for machines, pretty for humans)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never preformatted strings
//! - Request ID stamped on every forwarded request is logged alongside it
//! - Metric updates are fire-and-forget; no recorder installed means no-ops

pub mod logging;
pub mod metrics;
