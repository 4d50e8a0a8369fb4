//! Route storage and change delivery.
//!
//! # Data Flow
//! ```text
//! Admin API / config reload
//!     → RouteStore::{add, set, remove}
//!     → store-side state + change event
//!     → sync loop → SyncHandler::{set, remove}   (one caller at a time)
//! ```
//!
//! # Design Decisions
//! - `sync` replays the full snapshot first, then signals `ready`, then
//!   streams changes until `stop_sync`
//! - Handler errors are logged and skipped; one bad route never stalls sync

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::RouterError;
use crate::routing::Route;

pub use memory::MemoryRouteStore;

/// Receiver of route changes. Calls never overlap.
pub trait SyncHandler: Send + Sync {
    fn set(&self, route: Route) -> Result<(), RouterError>;
    fn remove(&self, id: &str) -> Result<(), RouterError>;
}

/// Persistent source of routes.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Store a new route. Fails with [`RouterError::Conflict`] if the ID exists.
    async fn add(&self, route: Route) -> Result<(), RouterError>;

    /// Store a route, replacing any existing one with the same ID.
    async fn set(&self, route: Route) -> Result<(), RouterError>;

    /// Delete a route. Fails with [`RouterError::NotFound`] if it is absent.
    async fn remove(&self, id: &str) -> Result<(), RouterError>;

    async fn get(&self, id: &str) -> Result<Route, RouterError>;

    async fn list(&self) -> Result<Vec<Route>, RouterError>;

    /// Deliver every current route to `handler`, report on `ready`, then keep
    /// delivering changes until [`stop_sync`](Self::stop_sync) is called.
    async fn sync(
        &self,
        handler: Arc<dyn SyncHandler>,
        ready: oneshot::Sender<Result<(), RouterError>>,
    );

    /// End every sync loop started so far. A later `sync` starts afresh.
    fn stop_sync(&self);
}
