//! Observer registration and status publishing.
//!
//! The ingestion pipeline depends on this narrow notify capability instead of any
//! transport layer. Delivery is synchronous and non-blocking: a transport adapter
//! forwards snapshots into its own channel and drains them on its side. Publishing
//! for a document happens under the notifier lock, so each observer sees that
//! document's transitions in the order they occurred.

use crate::document::{DocumentId, StatusSnapshot};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// Marker error reported by an observer whose sink can no longer accept deliveries.
#[derive(Debug)]
pub struct ObserverGone;

/// Receives status snapshots for a subscribed document.
pub trait StatusObserver: Send + Sync {
    /// Deliver a snapshot. Must not block; returning an error drops this observer.
    fn deliver(&self, snapshot: &StatusSnapshot) -> Result<(), ObserverGone>;
}

/// Observer adapter forwarding snapshots into an unbounded channel.
pub struct ChannelObserver {
    sender: UnboundedSender<StatusSnapshot>,
}

impl ChannelObserver {
    /// Wrap a channel sender as an observer.
    pub fn new(sender: UnboundedSender<StatusSnapshot>) -> Self {
        Self { sender }
    }
}

impl StatusObserver for ChannelObserver {
    fn deliver(&self, snapshot: &StatusSnapshot) -> Result<(), ObserverGone> {
        self.sender.send(snapshot.clone()).map_err(|_| ObserverGone)
    }
}

/// Handle identifying a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

struct Registered {
    id: ObserverId,
    observer: Box<dyn StatusObserver>,
}

/// Fan-out of lifecycle transitions to per-document observers.
#[derive(Default)]
pub struct StatusNotifier {
    next_id: AtomicU64,
    observers: Mutex<HashMap<DocumentId, Vec<Registered>>>,
}

impl StatusNotifier {
    /// Create a notifier with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an observer to a document's transitions.
    pub fn subscribe(&self, id: DocumentId, observer: Box<dyn StatusObserver>) -> ObserverId {
        let observer_id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .expect("notifier lock poisoned")
            .entry(id)
            .or_default()
            .push(Registered {
                id: observer_id,
                observer,
            });
        observer_id
    }

    /// Remove a single subscription. Returns whether it was present.
    pub fn unsubscribe(&self, id: DocumentId, observer_id: ObserverId) -> bool {
        let mut observers = self.observers.lock().expect("notifier lock poisoned");
        let Some(registered) = observers.get_mut(&id) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|entry| entry.id != observer_id);
        let removed = registered.len() < before;
        if registered.is_empty() {
            observers.remove(&id);
        }
        removed
    }

    /// Deliver a snapshot to every observer of the document.
    ///
    /// A failed delivery drops that observer and is logged; the remaining observers
    /// still receive the snapshot.
    pub fn publish(&self, id: DocumentId, snapshot: &StatusSnapshot) {
        let mut observers = self.observers.lock().expect("notifier lock poisoned");
        let Some(registered) = observers.get_mut(&id) else {
            return;
        };
        registered.retain(|entry| match entry.observer.deliver(snapshot) {
            Ok(()) => true,
            Err(ObserverGone) => {
                tracing::warn!(document_id = %id, state = ?snapshot.state, "Dropping unreachable status observer");
                false
            }
        });
        if registered.is_empty() {
            observers.remove(&id);
        }
    }

    /// Drop every subscription for the document.
    pub fn clear(&self, id: DocumentId) {
        self.observers
            .lock()
            .expect("notifier lock poisoned")
            .remove(&id);
    }

    /// Number of live observers for the document.
    pub fn observer_count(&self, id: DocumentId) -> usize {
        self.observers
            .lock()
            .expect("notifier lock poisoned")
            .get(&id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
