//! Typed publish/subscribe hub.
//!
//! Handlers run synchronously on the emitting thread, in registration order.
//! The capture loop emits from its own thread, so a handler must return
//! quickly or forward the event over a channel. Asynchronous observers can
//! `subscribe()` to a `tokio::sync::broadcast` feed instead.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use super::{EventEnvelope, SpeechEvent, SpeechEventKind};

/// Broadcast channel capacity for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Token returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&SpeechEvent) + Send + Sync>;

struct Registration {
    id: HandlerId,
    kind: SpeechEventKind,
    handler: Handler,
}

pub struct EventBus {
    handlers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    seq: AtomicU64,
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            tx,
        }
    }

    /// Register `handler` for every event of `kind`.
    pub fn on<F>(&self, kind: SpeechEventKind, handler: F) -> HandlerId
    where
        F: Fn(&SpeechEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push(Registration {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Deliver `event` to every matching handler, then to broadcast subscribers.
    pub fn emit(&self, event: SpeechEvent) {
        let kind = event.kind();
        // Snapshot so handlers may call on/off without deadlocking.
        let matching: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        trace!(?kind, handlers = matching.len(), "emitting speech event");
        for handler in &matching {
            handler(&event);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine.
        let _ = self.tx.send(EventEnvelope { seq, event });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn handler_count(&self, kind: SpeechEventKind) -> usize {
        self.handlers.read().iter().filter(|r| r.kind == kind).count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .finish_non_exhaustive()
    }
}
