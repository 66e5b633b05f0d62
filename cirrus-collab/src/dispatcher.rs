//! Typed fan-out of inbound events to subscribers.
//!
//! Handlers are keyed by [`EventKind`] and run in subscription order on the
//! publishing task. A handler that panics is isolated: the panic is logged
//! and delivery continues with the next handler. Events are never buffered,
//! so a subscriber only sees events published after it subscribed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::protocol::{EventKind, InboundEvent};

/// Shared handler callback.
pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    handlers: Mutex<HashMap<EventKind, Vec<Entry>>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    panicked: AtomicU64,
}

/// Publish/subscribe bus for [`InboundEvent`]s.
///
/// Cheap to clone; clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.subscribe_handler(kind, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn subscribe_handler(&self, kind: EventKind, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .entry(kind)
            .or_default()
            .push(Entry { id, handler });
        log::debug!("Subscribed handler {id} to {kind}");
        Subscription {
            dispatcher: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Deliver `event` to every handler registered for its kind.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may subscribe/unsubscribe while we deliver.
        let handlers: Vec<(u64, Handler)> = match self.inner.handlers.lock().get(&kind) {
            Some(entries) => entries.iter().map(|e| (e.id, e.handler.clone())).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.inner.panicked.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "Handler {id} for {kind} panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        self.inner.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Number of live handlers for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner.handlers.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Total successful deliveries and isolated panics so far.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.inner.handlers.lock();
        let total: usize = handlers.values().map(Vec::len).sum();
        f.debug_struct("Dispatcher").field("handlers", &total).finish()
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub panicked: u64,
}

/// Disposer for a registered handler.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    dispatcher: Weak<Inner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.dispatcher.upgrade() else {
            return;
        };
        let mut handlers = inner.handlers.lock();
        if let Some(entries) = handlers.get_mut(&self.kind) {
            entries.retain(|e| e.id != self.id);
            if entries.is_empty() {
                handlers.remove(&self.kind);
            }
        }
        log::debug!("Unsubscribed handler {} from {}", self.id, self.kind);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
