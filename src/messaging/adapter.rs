//! Bridge between an agent's sink callbacks and the event bus.
//!
//! Each adapter is bound to one (tab, agent) pair, optionally with the id of
//! the agent that invoked it, and stamps that identity on every event it
//! publishes. It keeps no buffer: events leave in the order the agent
//! reports them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::error;

use super::{AgentEvent, AgentOutput, EventBus, EventError, EventType};
use crate::agents::{AgentSinks, CanUseTool};

/// Converts [`AgentOutput`] into bus events for one agent on one tab.
#[derive(Clone)]
pub struct MessageAdapter {
    bus: EventBus,
    tab_id: String,
    agent_id: String,
    parent_agent_id: Option<String>,
    /// Shared by clones, so the sinks and the executor agree.
    failed: Arc<AtomicBool>,
}

impl MessageAdapter {
    /// Create an adapter for an agent running on a tab.
    pub fn new(bus: EventBus, tab_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            bus,
            tab_id: tab_id.into(),
            agent_id: agent_id.into(),
            parent_agent_id: None,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Link every event to the agent that invoked this one.
    pub fn with_parent(mut self, parent_agent_id: Option<String>) -> Self {
        self.parent_agent_id = parent_agent_id;
        self
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn parent_agent_id(&self) -> Option<&str> {
        self.parent_agent_id.as_deref()
    }

    /// Map one output onto its event. Pure; nothing is published.
    pub fn to_event(&self, output: AgentOutput) -> AgentEvent {
        let (event_type, payload) = match output {
            AgentOutput::Text(chunk) => (EventType::AgentText, Value::String(chunk)),
            AgentOutput::Reasoning(chunk) => (EventType::AgentReasoning, Value::String(chunk)),
            AgentOutput::Event(notice) => (
                EventType::AgentEvent,
                json!({ "type": notice.level, "message": notice.message }),
            ),
            AgentOutput::Completed(full_text) => {
                (EventType::AgentCompleted, Value::String(full_text))
            }
            AgentOutput::Failed(error) => (EventType::AgentFailed, Value::String(error)),
            AgentOutput::SessionResolved(session_id) => (
                EventType::AgentEvent,
                json!({ "type": "session", "sessionId": session_id }),
            ),
        };

        AgentEvent::new(event_type, &self.agent_id, &self.tab_id, payload)
            .with_parent(self.parent_agent_id.clone())
    }

    /// Publish one output to the bus.
    pub fn publish(&self, output: AgentOutput) -> Result<(), EventError> {
        let is_failure = matches!(output, AgentOutput::Failed(_));
        self.bus.emit(self.to_event(output))?;
        if is_failure {
            self.failed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Publish an `agent:failed` event.
    pub fn failed(&self, error: &str) -> Result<(), EventError> {
        self.publish(AgentOutput::Failed(error.to_string()))
    }

    /// Whether an `agent:failed` event already went out through this adapter
    /// or one of its clones.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Publish `agent:failed` unless one was already published for this run.
    pub fn fail_once(&self, error: &str) -> Result<(), EventError> {
        if self.has_failed() {
            return Ok(());
        }
        self.failed(error)
    }

    /// Build the sink set handed to an agent.
    ///
    /// Sinks are fire-and-forget; a rejected event is logged.
    pub fn create_sinks(&self, can_use_tool: CanUseTool) -> AgentSinks {
        let adapter = self.clone();
        AgentSinks::new(
            Arc::new(move |output| {
                if let Err(e) = adapter.publish(output) {
                    error!(
                        tab_id = %adapter.tab_id,
                        agent_id = %adapter.agent_id,
                        error = %e,
                        "Agent event rejected by bus"
                    );
                }
            }),
            can_use_tool,
        )
    }
}
