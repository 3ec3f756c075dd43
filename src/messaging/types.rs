//! Event envelope published on the [`EventBus`](super::EventBus).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventError;

/// Envelope version stamped on every event.
pub const EVENT_VERSION: &str = "1.0";

/// Closed set of event types carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "agent:text")]
    AgentText,
    #[serde(rename = "agent:reasoning")]
    AgentReasoning,
    #[serde(rename = "agent:event")]
    AgentEvent,
    #[serde(rename = "agent:completed")]
    AgentCompleted,
    #[serde(rename = "agent:failed")]
    AgentFailed,
    #[serde(rename = "message:added")]
    MessageAdded,
    #[serde(rename = "task:progress")]
    TaskProgress,
    #[serde(rename = "task:result")]
    TaskResult,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::AgentText,
        EventType::AgentReasoning,
        EventType::AgentEvent,
        EventType::AgentCompleted,
        EventType::AgentFailed,
        EventType::MessageAdded,
        EventType::TaskProgress,
        EventType::TaskResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentText => "agent:text",
            EventType::AgentReasoning => "agent:reasoning",
            EventType::AgentEvent => "agent:event",
            EventType::AgentCompleted => "agent:completed",
            EventType::AgentFailed => "agent:failed",
            EventType::MessageAdded => "message:added",
            EventType::TaskProgress => "task:progress",
            EventType::TaskResult => "task:result",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EventError::UnknownType(s.to_string()))
    }
}

/// A validated unit of communication between an execution and its observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub agent_id: String,
    pub tab_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
}

impl AgentEvent {
    /// Create an event stamped with the current time and envelope version.
    pub fn new(
        event_type: EventType,
        agent_id: impl Into<String>,
        tab_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            tab_id: tab_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            payload,
            version: EVENT_VERSION.to_string(),
            parent_agent_id: None,
        }
    }

    /// Attach the id of the agent that invoked this one.
    pub fn with_parent(mut self, parent_agent_id: Option<String>) -> Self {
        self.parent_agent_id = parent_agent_id;
        self
    }

    /// Check the envelope against the fixed schema.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.agent_id.trim().is_empty() {
            return Err(EventError::MissingField("agentId"));
        }
        if self.tab_id.trim().is_empty() {
            return Err(EventError::MissingField("tabId"));
        }
        if self.timestamp <= 0 {
            return Err(EventError::InvalidTimestamp(self.timestamp));
        }
        if self.version != EVENT_VERSION {
            return Err(EventError::UnsupportedVersion(self.version.clone()));
        }
        Ok(())
    }

    /// Decode an untyped event, reporting schema violations precisely.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventError::MissingField("type"))?;
        kind.parse::<EventType>()?;

        for field in ["agentId", "tabId", "timestamp", "version"] {
            if value.get(field).map_or(true, Value::is_null) {
                return Err(EventError::MissingField(field));
            }
        }

        let event: AgentEvent = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    /// Text carried by `agent:text`, `agent:reasoning`, `agent:completed`
    /// and `agent:failed` payloads.
    pub fn text(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

/// Severity of a structured agent notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Structured info/warning/error reported by an agent through `on_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNotice {
    #[serde(rename = "type")]
    pub level: NoticeLevel,
    pub message: String,
}

impl AgentNotice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// One unit of agent output, mapped 1:1 onto a bus event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Text(String),
    Reasoning(String),
    Event(AgentNotice),
    Completed(String),
    Failed(String),
    SessionResolved(String),
}
