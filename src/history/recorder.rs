//! Writes bus events into a [`MessageStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tracing::warn;

use super::message::{Message, MessageRole};
use super::store::MessageStore;
use crate::messaging::{AgentEvent, EventBus, EventType, ListenerId, Subscription, WeakEventBus};

/// A store shared between the recorder and readers.
pub type SharedMessageStore = Arc<Mutex<MessageStore>>;

/// Agent id stamped on `message:added` for what the user typed.
pub const USER_AGENT_ID: &str = "user";

/// Turns agent output into history.
///
/// Streamed text and reasoning accumulate in one pending assistant message
/// per (tab, agent) until `agent:completed` or `agent:failed` closes it.
/// Failures are also recorded as a boxed system message. Once attached,
/// every message that enters the store is announced as `message:added`.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: SharedMessageStore,
    pending: Arc<Mutex<HashMap<(String, String), u64>>>,
    bus: Arc<Mutex<Option<WeakEventBus>>>,
}

impl HistoryRecorder {
    pub fn new(store: SharedMessageStore) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
            bus: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &SharedMessageStore {
        &self.store
    }

    /// Subscribe to every event on `bus` and announce new messages on it.
    pub fn attach(&self, bus: &EventBus) -> ListenerId {
        *lock(&self.bus) = Some(bus.downgrade());
        let recorder = self.clone();
        bus.on(Subscription::Any, move |event| recorder.record(event))
    }

    /// Record what the user typed into a tab.
    pub fn record_user_input(&self, tab_id: &str, text: &str) -> u64 {
        let id = lock(&self.store).create_message(tab_id, MessageRole::User, text);
        self.announce(tab_id, USER_AGENT_ID, id, MessageRole::User);
        id
    }

    /// Record a boxed system notice on a tab on behalf of `agent_id`.
    pub fn record_notice(&self, tab_id: &str, agent_id: &str, text: impl Into<String>) -> u64 {
        let id = push_notice(&mut lock(&self.store), tab_id, text.into());
        self.announce(tab_id, agent_id, id, MessageRole::System);
        id
    }

    /// Apply one event to the store.
    pub fn record(&self, event: &AgentEvent) {
        // Locks are released before announcing; handlers may read the store.
        if let Some((id, role)) = self.apply(event) {
            self.announce(&event.tab_id, &event.agent_id, id, role);
        }
    }

    /// Write `event` into the store. Returns the message it added, if any.
    fn apply(&self, event: &AgentEvent) -> Option<(u64, MessageRole)> {
        let key = (event.tab_id.clone(), event.agent_id.clone());
        let mut store = lock(&self.store);
        let mut pending = lock(&self.pending);

        match event.event_type {
            EventType::AgentText | EventType::AgentReasoning => {
                let chunk = event.text()?;
                let mut added = None;
                let id = *pending.entry(key).or_insert_with(|| {
                    let id = store.start_pending_message(&event.tab_id, MessageRole::Assistant);
                    added = Some((id, MessageRole::Assistant));
                    id
                });
                let written = if event.event_type == EventType::AgentText {
                    store.append_to_message(id, chunk)
                } else {
                    store.append_reasoning(id, chunk)
                };
                if let Err(e) = written {
                    warn!(tab_id = %event.tab_id, error = %e, "Dropped streamed chunk");
                }
                added
            }
            EventType::AgentCompleted => match pending.remove(&key) {
                Some(id) => {
                    if let Err(e) = store.finalize_message(id) {
                        warn!(tab_id = %event.tab_id, error = %e, "Could not finalize message");
                    }
                    None
                }
                None => {
                    // Nothing was streamed; keep the full text.
                    let text = event.text().filter(|t| !t.is_empty())?;
                    let id = store.create_message(&event.tab_id, MessageRole::Assistant, text);
                    Some((id, MessageRole::Assistant))
                }
            },
            EventType::AgentFailed => {
                if let Some(id) = pending.remove(&key) {
                    if let Err(e) = store.finalize_message(id) {
                        warn!(tab_id = %event.tab_id, error = %e, "Could not finalize message");
                    }
                }
                let reason = event.text().unwrap_or("unknown error");
                let text = format!("{} failed: {}", event.agent_id, reason);
                let id = push_notice(&mut store, &event.tab_id, text);
                Some((id, MessageRole::System))
            }
            _ => None,
        }
    }

    /// Publish `message:added` on the attached bus.
    fn announce(&self, tab_id: &str, agent_id: &str, message_id: u64, role: MessageRole) {
        let Some(bus) = lock(&self.bus).as_ref().and_then(WeakEventBus::upgrade) else {
            return;
        };
        let event = AgentEvent::new(
            EventType::MessageAdded,
            agent_id,
            tab_id,
            json!({ "messageId": message_id, "role": role }),
        );
        if let Err(e) = bus.emit(event) {
            warn!(tab_id = %tab_id, message_id, error = %e, "Could not announce message");
        }
    }
}

fn push_notice(store: &mut MessageStore, tab_id: &str, text: String) -> u64 {
    let id = store.get_next_message_id();
    store.append_message(tab_id, Message::new(id, MessageRole::System, tab_id, text).boxed());
    id
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
