//! Event delivery for download jobs
//!
//! Handlers registered with [`EventBus::subscribe`] are called synchronously,
//! in registration order, on whichever task emits the event. Async consumers
//! can take a broadcast receiver from [`EventBus::channel`] instead.

use fetchline_types::{EventKind, JobEvent};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(&JobEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    /// `None` receives every kind
    kind: Option<EventKind>,
    handler: Handler,
}

pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Register a handler for one kind of event
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriberId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Receive events asynchronously
    pub fn channel(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: JobEvent) {
        let kind = event.kind();

        // Handlers run without the lock held so they may (un)subscribe
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| s.handler.clone())
            .collect();

        for handler in handlers {
            handler(&event);
        }

        let _ = self.event_tx.send(event);
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, kind, handler });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
