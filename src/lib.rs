//! tabexec Library
//!
//! Tab-scoped execution for conversational agents: at most one execution
//! per tab at a time, strict arrival order within a tab, full independence
//! across tabs, and every agent output published as a validated event.
//!
//! ## Main Components
//!
//! - [`execution`] - Per-tab queueing ([`TabExecutionManager`]) and the
//!   entry point that runs agents through it ([`TabExecutor`])
//! - [`agents`] - Agent contract and the lazily instantiating [`AgentRegistry`]
//! - [`messaging`] - [`EventBus`] and the [`MessageAdapter`] agents report through
//! - [`history`] - Tab-partitioned [`MessageStore`] and the recorder that fills it
//! - [`config`] - Settings and XDG directories
//!
//! ## Quick Start
//!
//! ```ignore
//! use tabexec::{AppContext, Settings, ECHO_AGENT_ID};
//!
//! let app = AppContext::new(Settings::load()?);
//! let result = app.submit("main", ECHO_AGENT_ID, "hello").await?;
//! ```

pub mod agents;
pub mod app;
pub mod config;
pub mod execution;
pub mod history;
pub mod messaging;

// Re-export commonly used types
pub use agents::{
    Agent, AgentEntry, AgentError, AgentHandle, AgentRegistry, AgentSinks, BoxedAgent,
    CanUseTool, PermissionDecision, ECHO_AGENT_ID,
};
pub use app::AppContext;
pub use config::{Settings, SettingsError, XdgDirs};
pub use execution::{
    ExecutionContext, ExecutionError, ExecutionResult, SessionState, TabExecutionManager,
    TabExecutor,
};
pub use history::{HistoryRecorder, Message, MessageRole, MessageStore};
pub use messaging::{AgentEvent, AgentOutput, EventBus, EventError, EventType, MessageAdapter};
