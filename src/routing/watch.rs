//! Change notifications for external watchers.
//!
//! Publishing goes through a broadcast channel: `send` never waits, and a
//! subscriber that falls behind loses the oldest events instead of slowing
//! route mutation down.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Set,
    Remove,
}

/// A route table change. `id` carries the domain for sets and the route ID
/// for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event: EventKind,
    pub id: String,
}

impl Event {
    pub fn set(domain: impl Into<String>) -> Self {
        Self {
            event: EventKind::Set,
            id: domain.into(),
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self {
            event: EventKind::Remove,
            id: id.into(),
        }
    }
}

/// Publish/subscribe point for route table changes.
#[derive(Debug, Clone)]
pub struct WatchManager {
    tx: broadcast::Sender<Event>,
}

impl WatchManager {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start receiving events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event to current subscribers, if any.
    pub fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No route watchers subscribed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for WatchManager {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
