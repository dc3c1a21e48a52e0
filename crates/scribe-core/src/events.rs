//! Session event notifications.
//!
//! The editing surface, status indicator, and comment panel live outside
//! this crate; they observe the session through `SessionEvent`s published on
//! an `EventBus`. Subscriptions follow the disposer pattern: hold the
//! `Subscription` to keep receiving events, drop it to unsubscribe.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::session::SessionState;

/// Events emitted as a session moves through its lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The session's state machine moved.
    StateChanged { state: SessionState },
    /// A document (and its sidecar) finished loading.
    Loaded { path: String },
    /// Document content was written; carries the new version token.
    Saved { path: String, version: String },
    /// A compare-and-swap write was rejected; the UI should offer reload.
    Conflict { path: String },
    /// The sidecar was replaced from the store (poll refresh or mutation).
    MetaChanged { path: String },
}

/// Subscription handle that unsubscribes when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Publishes session events to subscribers. Wrap in `Arc` to subscribe.
pub struct EventBus {
    callbacks: RwLock<HashMap<usize, Arc<dyn Fn(SessionEvent) + Send + Sync>>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. The returned handle unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(callback));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write so a Drop during panic unwinding cannot deadlock against
        // a read lock held by emit.
        if let Ok(mut callbacks) = self.callbacks.try_write() {
            callbacks.remove(&id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SessionEvent) {
        // Snapshot the callbacks so one of them may subscribe/unsubscribe
        // without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
