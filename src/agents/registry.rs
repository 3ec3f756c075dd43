//! Catalogue of agent factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, warn};

use super::base::{allow_all, AgentHandle, BoxedAgent, CanUseTool};
use super::builtin;
use crate::execution::ExecutionContext;
use crate::messaging::{EventBus, MessageAdapter};

/// Builds a fresh agent instance.
pub type AgentFactory = Arc<dyn Fn() -> Result<BoxedAgent, AgentError> + Send + Sync>;

/// A registered agent.
#[derive(Clone)]
pub struct AgentEntry {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub factory: AgentFactory,
}

impl AgentEntry {
    pub fn new<F>(id: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<BoxedAgent, AgentError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            tags: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentEntry")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Lazily-instantiating registry of agents.
///
/// Nothing is constructed at registration time; each [`create_agent`] call
/// runs the factory again.
///
/// [`create_agent`]: AgentRegistry::create_agent
#[derive(Default)]
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in agents.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Register built-in agents.
    pub fn register_builtins(&self) {
        self.register(builtin::EchoAgent::entry());
    }

    /// Register an agent. A duplicate id replaces the previous entry.
    pub fn register(&self, entry: AgentEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&entry.id) {
            warn!(agent_id = %entry.id, "Agent already registered, overwriting");
        } else {
            debug!(agent_id = %entry.id, "Registered agent");
        }
        entries.insert(entry.id.clone(), entry);
    }

    /// Remove an agent. Returns `false` if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    fn factory(&self, id: &str) -> Option<AgentFactory> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|e| Arc::clone(&e.factory))
    }

    /// Instantiate an agent.
    ///
    /// Returns `None` when the id is unknown or the factory fails; both are
    /// logged and mean "agent unavailable".
    pub fn create_agent(&self, id: &str) -> Option<BoxedAgent> {
        let Some(factory) = self.factory(id) else {
            warn!(agent_id = %id, "Agent not found");
            return None;
        };

        match factory() {
            Ok(agent) => Some(agent),
            Err(e) => {
                error!(agent_id = %id, error = %e, "Agent factory failed");
                None
            }
        }
    }

    /// Create an agent, wire it to the bus and start it.
    ///
    /// Events are attributed to `context.source_tab_id`. When the agent is
    /// unavailable or fails to start an `agent:failed` event is published
    /// before returning `None`.
    pub fn start_agent(
        &self,
        id: &str,
        user_input: &str,
        context: ExecutionContext,
        bus: &EventBus,
        can_use_tool: Option<CanUseTool>,
    ) -> Option<AgentHandle> {
        let adapter = MessageAdapter::new(bus.clone(), &context.source_tab_id, id)
            .with_parent(context.parent_agent_id.clone());

        let Some(agent) = self.create_agent(id) else {
            report_failure(&adapter, &AgentError::NotFound(id.to_string()));
            return None;
        };

        let can_use_tool = can_use_tool
            .or_else(|| context.can_use_tool.clone())
            .unwrap_or_else(allow_all);
        let sinks = adapter.create_sinks(can_use_tool);

        match agent.start(user_input, context, sinks) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(agent_id = %id, error = %e, "Agent failed to start");
                report_failure(&adapter, &e);
                None
            }
        }
    }

    /// Check if an agent exists.
    pub fn exists(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// List all registered agents, sorted by id.
    pub fn list(&self) -> Vec<AgentInfo> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut agents: Vec<_> = entries.values().map(AgentInfo::from).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// List agents carrying a tag, sorted by id.
    pub fn list_by_tag(&self, tag: &str) -> Vec<AgentInfo> {
        self.list()
            .into_iter()
            .filter(|a| a.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn report_failure(adapter: &MessageAdapter, error: &AgentError) {
    if let Err(e) = adapter.fail_once(&error.to_string()) {
        error!(agent_id = %adapter.agent_id(), error = %e, "Could not publish agent failure");
    }
}

/// Information about an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl From<&AgentEntry> for AgentInfo {
    fn from(entry: &AgentEntry) -> Self {
        Self {
            id: entry.id.clone(),
            description: entry.description.clone(),
            tags: entry.tags.clone(),
        }
    }
}

/// Agent-related errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),
    #[error("Agent factory failed: {0}")]
    Factory(String),
    #[error("Agent failed to start: {0}")]
    Start(String),
    #[error("Agent execution failed: {0}")]
    Execution(String),
    #[error("Agent cancelled")]
    Cancelled,
}
