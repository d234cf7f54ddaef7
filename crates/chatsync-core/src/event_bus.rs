//! Topic-based event bus between the sync engine and its consumers.
//!
//! Handlers registered with [`EventBus::on`] run synchronously inside
//! [`EventBus::emit`]. Every emitted event is also mirrored to a
//! `tokio::sync::broadcast` channel for async consumers.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use chatsync_types::{SyncEvent, Topic};

pub type EventHandler = Arc<dyn Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct BusInner {
    handlers: RwLock<HashMap<Topic, Vec<(HandlerId, EventHandler)>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<SyncEvent>,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds the async mirror channel
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Register `handler` for `topic`.
    ///
    /// The handler stays registered until the returned guard is dropped or
    /// [`EventBus::off`] is called with its id.
    pub fn on<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        debug!("Registered handler {:?} on {}", id, topic);

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Deregister a handler. Returns `false` if it was not registered.
    pub fn off(&self, topic: Topic, id: HandlerId) -> bool {
        remove_handler(&self.inner, topic, id)
    }

    /// Deliver `event` to the handlers of its topic, then to async receivers.
    pub fn emit(&self, event: SyncEvent) {
        let topic = event.topic();
        // Snapshot so handlers may call on/off without deadlocking
        let handlers: Vec<(HandlerId, EventHandler)> = self
            .inner
            .handlers
            .read()
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Handler {:?} on {} failed: {:#}", id, topic, e),
                Err(_) => error!("Handler {:?} on {} panicked", id, topic),
            }
        }

        // No async receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Async view of every emitted event
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.sender.subscribe()
    }

    pub fn handler_count(&self, topic: Topic) -> usize {
        self.inner.handlers.read().get(&topic).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn remove_handler(inner: &BusInner, topic: Topic, id: HandlerId) -> bool {
    let mut handlers = inner.handlers.write();
    let Some(list) = handlers.get_mut(&topic) else {
        return false;
    };
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    before != list.len()
}

/// Registration guard returned by [`EventBus::on`]; dropping it deregisters.
#[must_use = "dropping a Subscription deregisters its handler"]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: HandlerId,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.bus = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            remove_handler(&inner, self.topic, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
