//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, read PEM files)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → apply_reload: swap service addresses, reconcile seed routes
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes arrive as a whole new value
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener addresses are read once; reloads only touch routes and services

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, RouteConfig,
    ServiceConfig,
};
pub use watcher::{apply_reload, ConfigWatcher};
