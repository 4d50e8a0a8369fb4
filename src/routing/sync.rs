//! Applies route store notifications to the route table.

use std::sync::Arc;

use rustls::sign::CertifiedKey;

use crate::error::RouterError;
use crate::net::tls::parse_key_pair;
use crate::observability::metrics;
use crate::routing::route::Route;
use crate::routing::table::RouteTable;
use crate::routing::watch::{Event, WatchManager};
use crate::store::SyncHandler;

/// The route store's single writer into a [`RouteTable`].
#[derive(Debug, Clone)]
pub struct TableSyncHandler {
    table: Arc<RouteTable>,
    watch: WatchManager,
}

impl TableSyncHandler {
    pub fn new(table: Arc<RouteTable>, watch: WatchManager) -> Self {
        Self { table, watch }
    }
}

/// Parse the key pair a route carries.
///
/// A route with neither half has none; a route with only one half is an error.
pub fn route_key_pair(route: &Route) -> Result<Option<Arc<CertifiedKey>>, RouterError> {
    if route.tls_cert.is_empty() && route.tls_key.is_empty() {
        return Ok(None);
    }
    let key_pair = parse_key_pair(route.tls_cert.as_bytes(), route.tls_key.as_bytes())?;
    Ok(Some(Arc::new(key_pair)))
}

impl SyncHandler for TableSyncHandler {
    fn set(&self, route: Route) -> Result<(), RouterError> {
        // The plaintext key never reaches the table.
        let key_pair = route_key_pair(&route)?;
        let route = route.redacted();
        let domain = route.domain.clone();
        let id = route.id.clone();

        if self.table.insert(route, key_pair)? {
            tracing::info!(route_id = %id, domain = %domain, "Route set");
            metrics::set_route_count(self.table.len());
            self.watch.send(Event::set(domain));
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), RouterError> {
        if let Some(entry) = self.table.remove(id)? {
            tracing::info!(route_id = %id, domain = %entry.domain(), "Route removed");
            metrics::set_route_count(self.table.len());
            self.watch.send(Event::remove(id));
        }
        Ok(())
    }
}
