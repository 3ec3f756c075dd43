//! Tab-partitioned message history.
//!
//! Every tab keeps its own ordered log. One tab is visible at a time; the
//! others are held to the most recent `invisible_tab_limit` messages; a
//! message still streaming is never dropped, and the tab is trimmed again
//! once it is finalized. Ids
//! come from a single counter shared by all tabs, so a message can be found
//! by id without knowing its tab.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use super::message::{Message, MessageRole};

/// Messages kept for each hidden tab unless configured otherwise.
pub const DEFAULT_INVISIBLE_TAB_LIMIT: usize = 5;

/// History errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("Message not found: {0}")]
    MessageNotFound(u64),
    #[error("Message {0} is finalized")]
    NotPending(u64),
}

/// Visible tab's messages split at the first pending one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionedMessages<'a> {
    /// Finalized messages that will not change.
    pub frozen: &'a [Message],
    /// The streaming message and everything after it.
    pub active: &'a [Message],
}

#[derive(Debug)]
pub struct MessageStore {
    next_id: u64,
    tabs: HashMap<String, Vec<Message>>,
    current_tab: String,
    invisible_tab_limit: usize,
    /// Tabs the user switched away from and has not revisited.
    left: HashSet<String>,
}

impl MessageStore {
    pub fn new(current_tab: impl Into<String>) -> Self {
        Self::with_limit(current_tab, DEFAULT_INVISIBLE_TAB_LIMIT)
    }

    pub fn with_limit(current_tab: impl Into<String>, invisible_tab_limit: usize) -> Self {
        Self {
            next_id: 1,
            tabs: HashMap::new(),
            current_tab: current_tab.into(),
            invisible_tab_limit,
            left: HashSet::new(),
        }
    }

    pub fn current_tab(&self) -> &str {
        &self.current_tab
    }

    pub fn invisible_tab_limit(&self) -> usize {
        self.invisible_tab_limit
    }

    /// Reserve the next message id. Ids start at 1 and only grow.
    pub fn get_next_message_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Append to a tab's log. Hidden tabs are trimmed right away.
    pub fn append_message(&mut self, tab_id: &str, message: Message) {
        self.tabs.entry(tab_id.to_string()).or_default().push(message);
        if tab_id != self.current_tab {
            self.enforce_retention(tab_id);
        }
    }

    /// Append a finalized message with a fresh id. Returns the id.
    pub fn create_message(
        &mut self,
        tab_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> u64 {
        let id = self.get_next_message_id();
        self.append_message(tab_id, Message::new(id, role, tab_id, content));
        id
    }

    /// Append an empty pending message to stream into. Returns the id.
    pub fn start_pending_message(&mut self, tab_id: &str, role: MessageRole) -> u64 {
        let id = self.get_next_message_id();
        self.append_message(tab_id, Message::new(id, role, tab_id, "").pending());
        id
    }

    pub fn append_to_message(&mut self, id: u64, chunk: &str) -> Result<(), HistoryError> {
        self.pending_mut(id)?.append_content(chunk);
        Ok(())
    }

    pub fn append_reasoning(&mut self, id: u64, chunk: &str) -> Result<(), HistoryError> {
        self.pending_mut(id)?.append_reasoning(chunk);
        Ok(())
    }

    /// Mark a pending message final.
    pub fn finalize_message(&mut self, id: u64) -> Result<(), HistoryError> {
        let message = self.pending_mut(id)?;
        message.finish_streaming();
        let tab_id = message.source_tab_id.clone();
        if tab_id != self.current_tab {
            self.enforce_retention(&tab_id);
        }
        Ok(())
    }

    /// Look a message up in any tab.
    pub fn find_message(&self, id: u64) -> Option<&Message> {
        self.tabs.values().flatten().find(|m| m.id == id)
    }

    fn pending_mut(&mut self, id: u64) -> Result<&mut Message, HistoryError> {
        let message = self
            .tabs
            .values_mut()
            .flatten()
            .find(|m| m.id == id)
            .ok_or(HistoryError::MessageNotFound(id))?;
        if !message.is_pending {
            return Err(HistoryError::NotPending(id));
        }
        Ok(message)
    }

    /// Make `tab_id` the visible tab.
    ///
    /// The tab being left is trimmed. Returning to a tab that was left with
    /// history appends a boxed separator to it.
    pub fn set_current_tab(&mut self, tab_id: &str) {
        if tab_id == self.current_tab {
            return;
        }

        let previous = std::mem::replace(&mut self.current_tab, tab_id.to_string());
        self.enforce_retention(&previous);
        self.left.insert(previous);

        if self.left.remove(tab_id) && !self.get_messages_for_tab(tab_id).is_empty() {
            let id = self.get_next_message_id();
            let separator = Message::new(id, MessageRole::System, tab_id, format!("Back to {tab_id}"))
                .boxed();
            self.append_message(tab_id, separator);
        }
        debug!(tab_id = %tab_id, "Switched visible tab");
    }

    /// Drop the oldest finalized messages beyond the limit. Pending ones stay.
    fn enforce_retention(&mut self, tab_id: &str) {
        let limit = self.invisible_tab_limit;
        let Some(messages) = self.tabs.get_mut(tab_id) else {
            return;
        };
        let mut excess = messages.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        let before = messages.len();
        messages.retain(|m| {
            if excess > 0 && !m.is_pending {
                excess -= 1;
                false
            } else {
                true
            }
        });
        debug!(tab_id = %tab_id, dropped = before - messages.len(), "Trimmed hidden tab");
    }

    pub fn get_visible_messages(&self) -> &[Message] {
        self.get_messages_for_tab(&self.current_tab)
    }

    pub fn get_messages_for_tab(&self, tab_id: &str) -> &[Message] {
        self.tabs.get(tab_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn get_partitioned_messages(&self) -> PartitionedMessages<'_> {
        let messages = self.get_visible_messages();
        let split = messages
            .iter()
            .position(|m| m.is_pending)
            .unwrap_or(messages.len());
        let (frozen, active) = messages.split_at(split);
        PartitionedMessages { frozen, active }
    }

    /// Tabs with a log, sorted.
    pub fn tab_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tabs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn clear_tab(&mut self, tab_id: &str) {
        self.tabs.remove(tab_id);
        self.left.remove(tab_id);
    }

    /// Drop every tab's history and restart id numbering at 1.
    pub fn clear_all(&mut self) {
        self.tabs.clear();
        self.left.clear();
        self.next_id = 1;
    }
}
