//! Validated publish/subscribe bus for agent events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use super::{AgentEvent, EventType};

/// Default capacity of the async event stream.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Synchronous event handler.
pub type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// What a handler listens to: one event type, or every type (`*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    Kind(EventType),
    Any,
}

impl From<EventType> for Subscription {
    fn from(kind: EventType) -> Self {
        Subscription::Kind(kind)
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    handler: EventHandler,
    once: bool,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_type: HashMap<EventType, Vec<Listener>>,
    wildcard: Vec<Listener>,
}

impl Listeners {
    fn slot(&mut self, subscription: Subscription) -> &mut Vec<Listener> {
        match subscription {
            Subscription::Kind(kind) => self.by_type.entry(kind).or_default(),
            Subscription::Any => &mut self.wildcard,
        }
    }

    /// Collect handlers for one dispatch, dropping `once` listeners as they fire.
    fn take_handlers(&mut self, kind: EventType) -> Vec<EventHandler> {
        let mut handlers = Vec::new();
        for list in [self.by_type.get_mut(&kind), Some(&mut self.wildcard)]
            .into_iter()
            .flatten()
        {
            handlers.extend(list.iter().map(|l| Arc::clone(&l.handler)));
            list.retain(|l| !l.once);
        }
        handlers
    }
}

/// Process-wide event bus.
///
/// Emission validates the envelope, forwards the event to the async stream
/// returned by [`EventBus::subscribe`], then calls handlers registered for
/// the exact type followed by wildcard handlers, synchronously and in
/// registration order.
///
/// There is no replay: a handler registered after an emission never sees it.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose async stream buffers up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Arc::new(Mutex::new(Listeners::default())),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and publish an event.
    ///
    /// Invalid events are rejected before any subscriber runs.
    pub fn emit(&self, event: AgentEvent) -> Result<(), EventError> {
        event.validate()?;

        // Streamed first, so events emitted by handlers follow this one.
        // No stream subscribers is not an error.
        let _ = self.tx.send(event.clone());

        // Handlers run outside the lock so they may subscribe, unsubscribe
        // or emit.
        let handlers = self.lock().take_handlers(event.event_type);
        trace!(
            event_type = %event.event_type,
            tab_id = %event.tab_id,
            agent_id = %event.agent_id,
            handlers = handlers.len(),
            "Emitting event"
        );
        for handler in handlers {
            handler(&event);
        }
        Ok(())
    }

    /// Decode, validate and publish an untyped event.
    pub fn emit_value(&self, value: Value) -> Result<(), EventError> {
        self.emit(AgentEvent::from_value(value)?)
    }

    /// Register a handler.
    pub fn on<F>(&self, subscription: impl Into<Subscription>, handler: F) -> ListenerId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.add(subscription.into(), Arc::new(handler), false)
    }

    /// Register a handler that is removed after its first delivery.
    pub fn once<F>(&self, subscription: impl Into<Subscription>, handler: F) -> ListenerId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.add(subscription.into(), Arc::new(handler), true)
    }

    fn add(&self, subscription: Subscription, handler: EventHandler, once: bool) -> ListenerId {
        let mut listeners = self.lock();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.slot(subscription).push(Listener { id, handler, once });
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Listeners {
            by_type, wildcard, ..
        } = &mut *listeners;
        for list in by_type.values_mut().chain(std::iter::once(wildcard)) {
            if let Some(pos) = list.iter().position(|l| l.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of handlers registered for a subscription.
    pub fn listener_count(&self, subscription: impl Into<Subscription>) -> usize {
        let listeners = self.lock();
        match subscription.into() {
            Subscription::Kind(kind) => listeners.by_type.get(&kind).map_or(0, Vec::len),
            Subscription::Any => listeners.wildcard.len(),
        }
    }

    /// A handle that does not keep the handler list alive.
    ///
    /// Handlers that publish on the bus they listen to hold one of these.
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            listeners: Arc::downgrade(&self.listeners),
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to the async stream of every published event.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning handle to an [`EventBus`].
///
/// It does not keep handlers alive, but while it is held the async stream
/// stays open.
#[derive(Clone)]
pub struct WeakEventBus {
    listeners: Weak<Mutex<Listeners>>,
    tx: broadcast::Sender<AgentEvent>,
}

impl WeakEventBus {
    /// The bus, unless every owning handle is gone.
    pub fn upgrade(&self) -> Option<EventBus> {
        Some(EventBus {
            listeners: self.listeners.upgrade()?,
            tx: self.tx.clone(),
        })
    }
}

/// Receiver half of the async event stream.
pub struct EventReceiver {
    rx: broadcast::Receiver<AgentEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<AgentEvent, BusError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => BusError::Lagged(n),
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<AgentEvent>, BusError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }
}

/// Event schema violations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("Unsupported event version: {0}")]
    UnsupportedVersion(String),
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Async stream errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Channel closed")]
    Closed,
    #[error("Lagged behind by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_event(text: &str) -> AgentEvent {
        AgentEvent::new(EventType::AgentText, "story", "Story", json!(text))
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |label: &str| -> EventHandler {
            let log = Arc::clone(&log2);
            let label = label.to_string();
            Arc::new(move |event: &AgentEvent| {
                log.lock()
                    .unwrap()
                    .push(format!("{}:{}", label, event.text().unwrap_or_default()));
            })
        };
        (log, make)
    }

    // =========================================================================
    // Dispatch Tests
    // =========================================================================

    #[test]
    fn test_emit_reaches_exact_then_wildcard() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let wildcard = make("any");
        bus.on(Subscription::Any, move |e| wildcard(e));
        let exact = make("text");
        bus.on(EventType::AgentText, move |e| exact(e));

        bus.emit(text_event("hi")).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["text:hi", "any:hi"]);
    }

    #[test]
    fn test_emit_skips_other_types() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on(EventType::AgentCompleted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(text_event("hi")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emit_preserves_publish_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let handler = make("t");
        bus.on(EventType::AgentText, move |e| handler(e));

        for chunk in ["a", "b", "c"] {
            bus.emit(text_event(chunk)).unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["t:a", "t:b", "t:c"]);
    }

    #[test]
    fn test_invalid_event_reaches_nobody() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on(Subscription::Any, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let mut stream = bus.subscribe();

        let result = bus.emit_value(json!({
            "type": "bogus",
            "agentId": "story",
            "tabId": "Story",
            "timestamp": 1,
            "payload": null,
            "version": "1.0"
        }));

        assert!(matches!(result, Err(EventError::UnknownType(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(stream.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_emit_rejects_bad_version() {
        let bus = EventBus::new();
        let mut event = text_event("x");
        event.version = "1.1".into();
        assert!(matches!(
            bus.emit(event),
            Err(EventError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_late_subscriber_sees_nothing() {
        let bus = EventBus::new();
        bus.emit(text_event("early")).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on(EventType::AgentText, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Subscription Management Tests
    // =========================================================================

    #[test]
    fn test_once_fires_a_single_time() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.once(EventType::AgentText, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(text_event("1")).unwrap();
        bus.emit(text_event("2")).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EventType::AgentText), 0);
    }

    #[test]
    fn test_off_removes_handler() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.on(Subscription::Any, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(text_event("x")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let inner_slot = Arc::clone(&slot);
        let h = Arc::clone(&hits);
        let id = bus.on(EventType::AgentText, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *inner_slot.lock().unwrap() {
                inner_bus.off(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(text_event("1")).unwrap();
        bus.emit(text_event("2")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_count() {
        let bus = EventBus::new();
        bus.on(EventType::AgentText, |_| {});
        bus.on(EventType::AgentText, |_| {});
        bus.on(Subscription::Any, |_| {});

        assert_eq!(bus.listener_count(EventType::AgentText), 2);
        assert_eq!(bus.listener_count(Subscription::Any), 1);
        assert_eq!(bus.listener_count(EventType::TaskResult), 0);
    }

    // =========================================================================
    // Async Stream Tests
    // =========================================================================

    #[tokio::test]
    async fn test_stream_receives_events_in_order() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();

        bus.emit(text_event("first")).unwrap();
        bus.emit(text_event("second")).unwrap();

        assert_eq!(stream.recv().await.unwrap().text(), Some("first"));
        assert_eq!(stream.recv().await.unwrap().text(), Some("second"));
    }

    #[tokio::test]
    async fn test_stream_closed_when_bus_dropped() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();
        drop(bus);

        assert!(matches!(stream.recv().await, Err(BusError::Closed)));
    }

    #[test]
    fn test_stream_lagged() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.subscribe();
        for i in 0..5 {
            bus.emit(text_event(&i.to_string())).unwrap();
        }
        assert!(matches!(stream.try_recv(), Err(BusError::Lagged(n)) if n > 0));
    }

    #[test]
    fn test_stream_sees_event_before_handler_reactions() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();
        let weak = bus.downgrade();
        bus.on(EventType::AgentText, move |event| {
            if let Some(bus) = weak.upgrade() {
                let added = AgentEvent::new(
                    EventType::MessageAdded,
                    &event.agent_id,
                    &event.tab_id,
                    json!({"messageId": 1}),
                );
                bus.emit(added).unwrap();
            }
        });

        bus.emit(text_event("hi")).unwrap();

        assert_eq!(
            stream.try_recv().unwrap().unwrap().event_type,
            EventType::AgentText
        );
        assert_eq!(
            stream.try_recv().unwrap().unwrap().event_type,
            EventType::MessageAdded
        );
    }

    #[test]
    fn test_weak_handle_does_not_keep_bus_alive() {
        let bus = EventBus::new();
        let weak = bus.downgrade();
        assert!(weak.upgrade().is_some());
        drop(bus);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_emit_without_stream_subscribers_is_ok() {
        let bus = EventBus::new();
        assert!(bus.emit(text_event("nobody listening")).is_ok());
    }

    // =========================================================================
    // Error Display Tests
    // =========================================================================

    #[test]
    fn test_error_display() {
        assert_eq!(
            EventError::UnknownType("bogus".into()).to_string(),
            "Unknown event type: bogus"
        );
        assert_eq!(
            EventError::MissingField("tabId").to_string(),
            "Missing required field: tabId"
        );
        assert_eq!(BusError::Lagged(3).to_string(), "Lagged behind by 3 events");
    }
}
