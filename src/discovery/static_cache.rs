//! Statically configured address lists, replaceable at runtime.
//!
//! Each service name owns one `ArcSwap`'d list. Every cache opened for that
//! name shares it, so `set_addrs` is visible to in-flight services on their
//! next read without any lock on the request path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::discovery::{AddressCache, Discovery, DiscoveryError};

#[derive(Debug, Default)]
struct ServiceAddrs {
    addrs: ArcSwap<Vec<String>>,
    open_caches: AtomicUsize,
}

/// Discovery backed by in-memory address lists.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    services: Arc<DashMap<String, Arc<ServiceAddrs>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the address list for `service`.
    pub fn set_addrs<I, S>(&self, service: &str, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addrs: Vec<String> = addrs.into_iter().map(Into::into).collect();
        tracing::debug!(service = %service, count = addrs.len(), "Service addresses updated");
        self.entry(service).addrs.store(Arc::new(addrs));
    }

    /// Current address list for `service`.
    pub fn addrs(&self, service: &str) -> Vec<String> {
        self.services
            .get(service)
            .map(|s| s.addrs.load().as_ref().clone())
            .unwrap_or_default()
    }

    /// Names of all services known to this discovery.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of caches opened for `service` and not yet closed.
    pub fn open_caches(&self, service: &str) -> usize {
        self.services
            .get(service)
            .map(|s| s.open_caches.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn entry(&self, service: &str) -> Arc<ServiceAddrs> {
        self.services
            .entry(service.to_string())
            .or_default()
            .value()
            .clone()
    }
}

impl Discovery for StaticDiscovery {
    fn open(&self, service: &str) -> Result<Arc<dyn AddressCache>, DiscoveryError> {
        if service.is_empty() {
            return Err(DiscoveryError {
                service: service.to_string(),
                reason: "empty service name".to_string(),
            });
        }
        let shared = self.entry(service);
        shared.open_caches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(service = %service, "Address cache opened");
        Ok(Arc::new(StaticAddressCache {
            service: service.to_string(),
            shared,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle onto one service's address list.
#[derive(Debug)]
pub struct StaticAddressCache {
    service: String,
    shared: Arc<ServiceAddrs>,
    closed: AtomicBool,
}

impl AddressCache for StaticAddressCache {
    fn addrs(&self) -> Vec<String> {
        if self.closed.load(Ordering::Acquire) {
            return Vec::new();
        }
        self.shared.addrs.load().as_ref().clone()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.open_caches.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(service = %self.service, "Address cache closed");
        }
    }
}
