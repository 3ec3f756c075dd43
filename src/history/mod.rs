//! Conversation history.
//!
//! [`MessageStore`] holds one log per tab; [`HistoryRecorder`] fills it from
//! the event bus.

mod message;
mod recorder;
mod store;

pub use message::{Message, MessageRole};
pub use recorder::{HistoryRecorder, SharedMessageStore, USER_AGENT_ID};
pub use store::{HistoryError, MessageStore, PartitionedMessages, DEFAULT_INVISIBLE_TAB_LIMIT};
