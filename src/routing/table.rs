//! The live route table.
//!
//! Three maps sit behind one `RwLock`:
//!
//! ```text
//! routes:   route ID   → RouteEntry
//! domains:  domain     → RouteEntry   (lower-cased, one entry per domain)
//! services: name       → Service + count of routes using it
//! ```
//!
//! Invariants held at every unlock:
//! - every domain index entry is also in the ID index under its own ID
//! - a service exists exactly while at least one route references it
//!
//! Writers take the exclusive lock, readers (request routing, SNI) the shared
//! one. Nothing in here performs network I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use rustls::sign::CertifiedKey;

use crate::discovery::{AddressCache, Discovery};
use crate::error::RouterError;
use crate::routing::route::{normalize_domain, normalize_host, Route};
use crate::sticky::StickyCodec;

/// Number of leading labels tried when looking for a wildcard match.
pub const MAX_WILDCARD_DEPTH: usize = 4;

/// A backend service shared by every route naming it.
pub struct Service {
    name: String,
    cache: Arc<dyn AddressCache>,
    codec: Arc<StickyCodec>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the currently live backend addresses.
    pub fn addrs(&self) -> Vec<String> {
        self.cache.addrs()
    }

    pub fn codec(&self) -> &StickyCodec {
        &self.codec
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A route as held by the table: TLS material parsed, service attached.
#[derive(Debug)]
pub struct RouteEntry {
    route: Route,
    domain: String,
    service: Arc<Service>,
    key_pair: Option<Arc<CertifiedKey>>,
}

impl RouteEntry {
    pub fn id(&self) -> &str {
        &self.route.id
    }

    /// Lower-cased domain used as the index key.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn sticky(&self) -> bool {
        self.route.sticky
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn key_pair(&self) -> Option<Arc<CertifiedKey>> {
        self.key_pair.clone()
    }

    /// The stored route, without TLS material.
    pub fn route(&self) -> &Route {
        &self.route
    }
}

struct ServiceSlot {
    service: Arc<Service>,
    refs: usize,
}

#[derive(Default)]
struct Tables {
    closed: bool,
    routes: HashMap<String, Arc<RouteEntry>>,
    domains: HashMap<String, Arc<RouteEntry>>,
    services: HashMap<String, ServiceSlot>,
}

impl Tables {
    /// Take a reference on `name`, opening its address cache on first use.
    fn acquire(
        &mut self,
        name: &str,
        discovery: &dyn Discovery,
        codec: &Arc<StickyCodec>,
    ) -> Result<Arc<Service>, RouterError> {
        if let Some(slot) = self.services.get_mut(name) {
            slot.refs += 1;
            return Ok(slot.service.clone());
        }

        let cache = discovery.open(name)?;
        let service = Arc::new(Service {
            name: name.to_string(),
            cache,
            codec: codec.clone(),
        });
        self.services.insert(
            name.to_string(),
            ServiceSlot {
                service: service.clone(),
                refs: 1,
            },
        );
        tracing::debug!(service = %name, "Service created");
        Ok(service)
    }

    /// Drop a reference on `name`, closing its cache when none remain.
    fn release(&mut self, name: &str) {
        let Some(slot) = self.services.get_mut(name) else {
            return;
        };
        slot.refs -= 1;
        if slot.refs == 0 {
            if let Some(slot) = self.services.remove(name) {
                slot.service.cache.close();
                tracing::debug!(service = %name, "Service destroyed");
            }
        }
    }

    /// Remove `entry` from both indexes and release its service.
    fn unlink(&mut self, entry: &RouteEntry) {
        self.routes.remove(entry.id());
        if self
            .domains
            .get(&entry.domain)
            .is_some_and(|e| e.id() == entry.id())
        {
            self.domains.remove(&entry.domain);
        }
        self.release(entry.service.name());
    }
}

/// Point-in-time copy of the table's indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    /// `(id, domain)` pairs from the ID index.
    pub routes: Vec<(String, String)>,
    /// `(domain, id)` pairs from the domain index.
    pub domains: Vec<(String, String)>,
    /// `(service, reference count)` pairs.
    pub services: Vec<(String, usize)>,
}

/// Concurrent route table.
pub struct RouteTable {
    inner: RwLock<Tables>,
    discovery: Arc<dyn Discovery>,
    codec: Arc<StickyCodec>,
}

impl RouteTable {
    pub fn new(discovery: Arc<dyn Discovery>, codec: StickyCodec) -> Self {
        Self {
            inner: RwLock::new(Tables::default()),
            discovery,
            codec: Arc::new(codec),
        }
    }

    /// Insert or replace the route with `route.id`.
    ///
    /// Returns `Ok(false)` without touching anything once the table is closed.
    /// If another route already held the same domain it is evicted. A failure
    /// to open the service's address cache leaves the table unchanged.
    pub fn insert(
        &self,
        route: Route,
        key_pair: Option<Arc<CertifiedKey>>,
    ) -> Result<bool, RouterError> {
        let domain = normalize_domain(&route.domain);
        let mut tables = self.inner.write().expect("route table lock poisoned");
        if tables.closed {
            return Ok(false);
        }

        // Acquire before releasing so an unchanged service is never torn down.
        let service = tables.acquire(&route.service, self.discovery.as_ref(), &self.codec)?;

        let entry = Arc::new(RouteEntry {
            route,
            domain: domain.clone(),
            service,
            key_pair,
        });

        if let Some(previous) = tables.routes.get(entry.id()).cloned() {
            tables.unlink(&previous);
        }
        if let Some(holder) = tables.domains.get(&domain).cloned() {
            tracing::info!(
                domain = %domain,
                evicted = %holder.id(),
                "Domain reassigned to newer route"
            );
            tables.unlink(&holder);
        }

        tables.routes.insert(entry.id().to_string(), entry.clone());
        tables.domains.insert(domain, entry);
        Ok(true)
    }

    /// Remove the route with `id`.
    ///
    /// Returns `Ok(None)` without touching anything once the table is closed.
    pub fn remove(&self, id: &str) -> Result<Option<Arc<RouteEntry>>, RouterError> {
        let mut tables = self.inner.write().expect("route table lock poisoned");
        if tables.closed {
            return Ok(None);
        }
        let entry = tables
            .routes
            .get(id)
            .cloned()
            .ok_or_else(|| RouterError::NotFound(id.to_string()))?;
        tables.unlink(&entry);
        Ok(Some(entry))
    }

    /// Find the route serving `host`.
    ///
    /// The port is ignored and matching is case-insensitive. An exact domain
    /// wins; otherwise `*.<suffix>` is tried dropping one leading label at a
    /// time, up to [`MAX_WILDCARD_DEPTH`] labels.
    pub fn resolve(&self, host: &str) -> Option<Arc<RouteEntry>> {
        let host = normalize_host(host);
        let tables = self.inner.read().expect("route table lock poisoned");

        if let Some(entry) = tables.domains.get(&host) {
            return Some(entry.clone());
        }

        let labels: Vec<&str> = host.split('.').collect();
        let depth = MAX_WILDCARD_DEPTH.min(labels.len().saturating_sub(1));
        (1..=depth).find_map(|skip| {
            let key = format!("*.{}", labels[skip..].join("."));
            tables.domains.get(&key).cloned()
        })
    }

    /// Check that `service` can be resolved without taking a reference on it.
    ///
    /// A service already in the table passes; otherwise its address cache is
    /// opened and closed again.
    pub fn check_service(&self, service: &str) -> Result<(), RouterError> {
        let tables = self.inner.read().expect("route table lock poisoned");
        if tables.closed {
            return Err(RouterError::Closed);
        }
        if tables.services.contains_key(service) {
            return Ok(());
        }
        drop(tables);
        self.discovery.open(service)?.close();
        Ok(())
    }

    /// Look up a route by ID.
    pub fn get(&self, id: &str) -> Option<Arc<RouteEntry>> {
        let tables = self.inner.read().expect("route table lock poisoned");
        tables.routes.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("route table lock poisoned").routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of routes referencing `service`, `None` if it does not exist.
    pub fn service_refs(&self, service: &str) -> Option<usize> {
        let tables = self.inner.read().expect("route table lock poisoned");
        tables.services.get(service).map(|slot| slot.refs)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().expect("route table lock poisoned").closed
    }

    /// Close every address cache and stop accepting mutations.
    ///
    /// Returns `false` if the table was already closed.
    pub fn close(&self) -> bool {
        let mut tables = self.inner.write().expect("route table lock poisoned");
        if tables.closed {
            return false;
        }
        tables.closed = true;
        for (name, slot) in tables.services.drain() {
            slot.service.cache.close();
            tracing::debug!(service = %name, "Service destroyed");
        }
        tables.routes.clear();
        tables.domains.clear();
        true
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let tables = self.inner.read().expect("route table lock poisoned");
        let mut snapshot = TableSnapshot {
            routes: tables
                .routes
                .iter()
                .map(|(id, e)| (id.clone(), e.domain.clone()))
                .collect(),
            domains: tables
                .domains
                .iter()
                .map(|(domain, e)| (domain.clone(), e.id().to_string()))
                .collect(),
            services: tables
                .services
                .iter()
                .map(|(name, slot)| (name.clone(), slot.refs))
                .collect(),
        };
        snapshot.routes.sort();
        snapshot.domains.sort();
        snapshot.services.sort();
        snapshot
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (routes, closed) = match self.inner.read() {
            Ok(tables) => (tables.routes.len(), tables.closed),
            Err(_) => (0, true),
        };
        f.debug_struct("RouteTable")
            .field("routes", &routes)
            .field("closed", &closed)
            .finish_non_exhaustive()
    }
}
