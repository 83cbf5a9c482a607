use crate::broadcast::Delivery;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// Process-unique identity of one subscriber connection.
pub type ConnId = u64;

/// Handle held in the registry, used to hand deliveries to a session task.
#[derive(Clone, Debug)]
pub struct SubscriberHandle {
    /// Identity allocated when the connection was accepted.
    pub id: ConnId,
    /// Remote address of the subscriber.
    pub peer: SocketAddr,
    /// Instant when the session registered.
    pub connected_at: Instant,
    /// Channel into the session task that owns the WebSocket sink.
    pub tx: mpsc::Sender<Delivery>,
}

/// Concurrent set of open subscriber connections.
///
/// Only a session adds or removes its own handle; the broadcaster reads
/// through [`ConnectionRegistry::snapshot`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: DashMap<ConnId, SubscriberHandle>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh connection identity.
    pub fn allocate_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a handle. Returns `false` and leaves the registry untouched if
    /// the id is already present.
    pub fn add(&self, handle: SubscriberHandle) -> bool {
        match self.members.entry(handle.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
        }
    }

    /// Remove a handle. Returns `false` if it was not present.
    pub fn remove(&self, id: ConnId) -> bool {
        self.take(id).is_some()
    }

    /// Remove a handle and return it, or `None` if it was not present.
    pub fn take(&self, id: ConnId) -> Option<SubscriberHandle> {
        self.members.remove(&id).map(|(_, handle)| handle)
    }

    /// Clone of the current members, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriberHandle> {
        self.members
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Whether a connection is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
