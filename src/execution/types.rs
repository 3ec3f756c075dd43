//! Records passed into and out of tab executions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::agents::CanUseTool;

/// Conversation session carried across executions on one tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    pub initialized: bool,
    /// Derived from another tab's session rather than continued in place.
    #[serde(default)]
    pub forked: bool,
}

impl SessionState {
    /// An initialized session continued in place.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initialized: true,
            forked: false,
        }
    }

    /// Mark this session as a fork of its source.
    pub fn forked(mut self) -> Self {
        self.forked = true;
        self
    }
}

/// Context handed unchanged from the caller to the agent.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    /// Tab the request originated from.
    pub source_tab_id: String,
    pub workspace_path: Option<PathBuf>,
    /// Session to continue; filled from the tab when absent.
    pub session: Option<SessionState>,
    /// Permission callback; every tool is allowed when absent.
    pub can_use_tool: Option<CanUseTool>,
    /// Agent that requested this execution, for call hierarchies.
    pub parent_agent_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(source_tab_id: impl Into<String>) -> Self {
        Self {
            source_tab_id: source_tab_id.into(),
            ..Self::default()
        }
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_can_use_tool(mut self, can_use_tool: CanUseTool) -> Self {
        self.can_use_tool = Some(can_use_tool);
        self
    }

    pub fn with_parent_agent(mut self, parent_agent_id: impl Into<String>) -> Self {
        self.parent_agent_id = Some(parent_agent_id.into());
        self
    }

    /// Reject contexts missing required fields.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.source_tab_id.trim().is_empty() {
            return Err(ExecutionError::InvalidContext(
                "source tab id is required".to_string(),
            ));
        }
        if let Some(session) = &self.session {
            if session.id.trim().is_empty() {
                return Err(ExecutionError::InvalidContext(
                    "session id cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("source_tab_id", &self.source_tab_id)
            .field("workspace_path", &self.workspace_path)
            .field("session", &self.session)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("parent_agent_id", &self.parent_agent_id)
            .finish()
    }
}

/// Terminal outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(session_id: Option<String>) -> Self {
        Self {
            success: true,
            session_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            error: Some(error.into()),
        }
    }
}

/// One unit of work admitted to a tab.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub tab_id: String,
    pub agent_id: String,
    pub user_input: String,
    pub context: ExecutionContext,
}

/// Identity of the execution currently holding a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionHandle {
    pub id: Uuid,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
}

impl ExecutionHandle {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            started_at: Utc::now(),
        }
    }
}

/// Errors surfaced to callers of the execution layer.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("Queued execution cancelled for tab {tab_id}")]
    Cancelled { tab_id: String },
    #[error("Executor failed: {0}")]
    Executor(String),
    #[error("Invalid execution context: {0}")]
    InvalidContext(String),
    #[error("Execution timed out after {0:?}")]
    TimedOut(Duration),
}

impl ExecutionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled { .. })
    }
}
