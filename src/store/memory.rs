//! In-process route store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot, watch};

use crate::error::RouterError;
use crate::routing::Route;
use crate::store::{RouteStore, SyncHandler};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum StoreEvent {
    Set(Route),
    Remove(String),
}

/// Route store backed by a concurrent map.
///
/// Writers update the map and broadcast the change while holding the entry's
/// shard lock, so events for one ID go out in the order they were applied. A
/// sync loop that falls behind the broadcast re-reads the whole map and
/// removes whatever it delivered earlier that has since disappeared.
#[derive(Debug)]
pub struct MemoryRouteStore {
    routes: DashMap<String, Route>,
    events: broadcast::Sender<StoreEvent>,
    /// Bumped by `stop_sync`; a sync loop exits once it moves past its own value.
    stop: watch::Sender<u64>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stop, _) = watch::channel(0);
        Self {
            routes: DashMap::new(),
            events,
            stop,
        }
    }

    /// Store seeded with `routes`.
    pub fn with_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let store = Self::new();
        for mut route in routes {
            if route.id.is_empty() {
                route.assign_id();
            }
            store.routes.insert(route.id.clone(), route);
        }
        store
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers simply means no sync loop is running yet.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> Vec<Route> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    fn replay(&self, handler: &dyn SyncHandler, delivered: &mut HashSet<String>) {
        let routes = self.snapshot();
        let live: HashSet<String> = routes.iter().map(|r| r.id.clone()).collect();

        for stale in delivered.difference(&live) {
            if let Err(e) = handler.remove(stale) {
                tracing::debug!(route_id = %stale, error = %e, "Skipping stale route removal");
            }
        }
        for route in routes {
            let id = route.id.clone();
            if let Err(e) = handler.set(route) {
                tracing::error!(route_id = %id, error = %e, "Failed to apply route");
            }
        }
        *delivered = live;
    }
}

impl Default for MemoryRouteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn add(&self, route: Route) -> Result<(), RouterError> {
        match self.routes.entry(route.id.clone()) {
            Entry::Occupied(_) => Err(RouterError::Conflict(route.id)),
            Entry::Vacant(slot) => {
                let _held = slot.insert(route.clone());
                self.publish(StoreEvent::Set(route));
                Ok(())
            }
        }
    }

    async fn set(&self, route: Route) -> Result<(), RouterError> {
        let _held = self.routes.entry(route.id.clone()).insert(route.clone());
        self.publish(StoreEvent::Set(route));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RouterError> {
        match self.routes.entry(id.to_string()) {
            Entry::Vacant(_) => Err(RouterError::NotFound(id.to_string())),
            Entry::Occupied(slot) => {
                self.publish(StoreEvent::Remove(id.to_string()));
                slot.remove();
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Route, RouterError> {
        self.routes
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| RouterError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Route>, RouterError> {
        let mut routes = self.snapshot();
        routes.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(routes)
    }

    async fn sync(
        &self,
        handler: Arc<dyn SyncHandler>,
        ready: oneshot::Sender<Result<(), RouterError>>,
    ) {
        // Subscribe before the snapshot so nothing written in between is lost.
        let mut events = self.events.subscribe();
        let mut stop = self.stop.subscribe();
        let epoch = *stop.borrow_and_update();

        let mut delivered = HashSet::new();
        self.replay(handler.as_ref(), &mut delivered);
        tracing::info!(routes = delivered.len(), "Route store synced");
        let _ = ready.send(Ok(()));

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() != epoch {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(StoreEvent::Set(route)) => {
                        let id = route.id.clone();
                        match handler.set(route) {
                            Ok(()) => {
                                delivered.insert(id);
                            }
                            Err(e) => tracing::error!(route_id = %id, error = %e, "Failed to apply route"),
                        }
                    }
                    Ok(StoreEvent::Remove(id)) => {
                        delivered.remove(&id);
                        if let Err(e) = handler.remove(&id) {
                            tracing::debug!(route_id = %id, error = %e, "Route removal not applied");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Route sync fell behind, replaying snapshot");
                        self.replay(handler.as_ref(), &mut delivered);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::info!("Route store sync stopped");
    }

    fn stop_sync(&self) {
        self.stop.send_modify(|epoch| *epoch += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl SyncHandler for Recorder {
        fn set(&self, route: Route) -> Result<(), RouterError> {
            self.calls.lock().unwrap().push(format!("set {}", route.domain));
            Ok(())
        }

        fn remove(&self, id: &str) -> Result<(), RouterError> {
            self.calls.lock().unwrap().push(format!("remove {}", id));
            Ok(())
        }
    }

    async fn wait_for(recorder: &Recorder, len: usize) {
        for _ in 0..100 {
            if recorder.calls.lock().unwrap().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} sync calls", len);
    }

    #[tokio::test]
    async fn add_conflicts_on_existing_id() {
        let store = MemoryRouteStore::new();
        store.add(Route::new("a.test", "svc1")).await.unwrap();
        let err = store.add(Route::new("a.test", "svc2")).await.unwrap_err();
        assert!(matches!(err, RouterError::Conflict(_)));

        store.set(Route::new("a.test", "svc2")).await.unwrap();
        let stored = store.get(&Route::new("a.test", "").id).await.unwrap();
        assert_eq!(stored.service, "svc2");
    }

    #[tokio::test]
    async fn remove_missing_is_not_found() {
        let store = MemoryRouteStore::new();
        assert!(matches!(store.remove("nope").await, Err(RouterError::NotFound(_))));
    }

    #[tokio::test]
    async fn sync_replays_then_streams() {
        let store = Arc::new(MemoryRouteStore::with_routes([Route::new("a.test", "svc1")]));
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = oneshot::channel();

        let task = {
            let store = store.clone();
            let handler: Arc<dyn SyncHandler> = recorder.clone();
            tokio::spawn(async move { store.sync(handler, tx).await })
        };
        rx.await.unwrap().unwrap();
        assert_eq!(recorder.calls.lock().unwrap().as_slice(), ["set a.test"]);

        let b = Route::new("b.test", "svc1");
        store.add(b.clone()).await.unwrap();
        store.remove(&b.id).await.unwrap();
        wait_for(&recorder, 3).await;

        store.stop_sync();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls[1], "set b.test");
        assert_eq!(calls[2], format!("remove {}", b.id));
    }

    #[derive(Default)]
    struct LastSeen {
        services: Mutex<std::collections::HashMap<String, String>>,
        sets: std::sync::atomic::AtomicUsize,
    }

    impl SyncHandler for LastSeen {
        fn set(&self, route: Route) -> Result<(), RouterError> {
            self.services.lock().unwrap().insert(route.id, route.service);
            self.sets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn remove(&self, id: &str) -> Result<(), RouterError> {
            self.services.lock().unwrap().remove(id);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_deliver_the_stored_version_last() {
        let store = Arc::new(MemoryRouteStore::new());
        let seen = Arc::new(LastSeen::default());
        let (tx, rx) = oneshot::channel();
        {
            let store = store.clone();
            let handler: Arc<dyn SyncHandler> = seen.clone();
            tokio::spawn(async move { store.sync(handler, tx).await });
        }
        rx.await.unwrap().unwrap();

        let writers: Vec<_> = (0..8)
            .map(|w| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        let service = format!("svc-{}-{}", w, i);
                        store.set(Route::new("race.test", service)).await.unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        for _ in 0..200 {
            if seen.sets.load(std::sync::atomic::Ordering::SeqCst) >= 400 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let id = Route::new("race.test", "").id;
        let stored = store.get(&id).await.unwrap().service;
        assert_eq!(seen.services.lock().unwrap().get(&id), Some(&stored));
        store.stop_sync();
    }

    #[tokio::test]
    async fn sync_can_restart_after_stop() {
        let store = Arc::new(MemoryRouteStore::with_routes([Route::new("a.test", "svc1")]));

        let first = Arc::new(Recorder::default());
        let (tx, rx) = oneshot::channel();
        let task = {
            let store = store.clone();
            let handler: Arc<dyn SyncHandler> = first.clone();
            tokio::spawn(async move { store.sync(handler, tx).await })
        };
        rx.await.unwrap().unwrap();
        store.stop_sync();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let second = Arc::new(Recorder::default());
        let (tx, rx) = oneshot::channel();
        {
            let store = store.clone();
            let handler: Arc<dyn SyncHandler> = second.clone();
            tokio::spawn(async move { store.sync(handler, tx).await });
        }
        rx.await.unwrap().unwrap();
        store.add(Route::new("b.test", "svc1")).await.unwrap();
        wait_for(&second, 2).await;

        assert_eq!(first.calls.lock().unwrap().as_slice(), ["set a.test"]);
        assert_eq!(second.calls.lock().unwrap().as_slice(), ["set a.test", "set b.test"]);
        store.stop_sync();
    }
}
