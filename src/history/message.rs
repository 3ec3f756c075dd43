//! History entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single history entry.
///
/// Content only changes while `is_pending` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub role: MessageRole,
    pub content: String,
    pub source_tab_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Rendered inside a box (separators, errors).
    #[serde(default)]
    pub is_boxed: bool,
    /// Still streaming in.
    #[serde(default)]
    pub is_pending: bool,
}

impl Message {
    pub fn new(
        id: u64,
        role: MessageRole,
        source_tab_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            source_tab_id: source_tab_id.into(),
            timestamp: Utc::now(),
            reasoning: None,
            is_boxed: false,
            is_pending: false,
        }
    }

    pub fn boxed(mut self) -> Self {
        self.is_boxed = true;
        self
    }

    pub fn pending(mut self) -> Self {
        self.is_pending = true;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn append_content(&mut self, text: &str) {
        self.content.push_str(text);
    }

    pub fn append_reasoning(&mut self, text: &str) {
        self.reasoning.get_or_insert_with(String::new).push_str(text);
    }

    pub fn finish_streaming(&mut self) {
        self.is_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let msg = Message::new(3, MessageRole::System, "Story", "sep")
            .boxed()
            .pending()
            .with_reasoning("why");
        assert_eq!(msg.id, 3);
        assert_eq!(msg.source_tab_id, "Story");
        assert!(msg.is_boxed);
        assert!(msg.is_pending);
        assert_eq!(msg.reasoning.as_deref(), Some("why"));
    }

    #[test]
    fn test_streaming_appends() {
        let mut msg = Message::new(1, MessageRole::Assistant, "Story", "").pending();
        msg.append_content("Hel");
        msg.append_content("lo");
        msg.append_reasoning("think");
        msg.append_reasoning("ing");
        msg.finish_streaming();

        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.reasoning.as_deref(), Some("thinking"));
        assert!(!msg.is_pending);
    }

    #[test]
    fn test_serialization_shape() {
        let msg = Message::new(7, MessageRole::User, "Story", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["role"], "user");
        assert_eq!(json["sourceTabId"], "Story");
        assert_eq!(json["isPending"], false);
        assert!(json.get("reasoning").is_none());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
