//! Agent system.
//!
//! This module provides:
//! - [`Agent`] trait and the [`AgentSinks`] callback set agents report through
//! - [`AgentRegistry`] for lazily constructing agents by id
//! - Built-in agents

mod base;
mod builtin;
mod registry;

pub use base::{
    allow_all, Agent, AgentCompletion, AgentHandle, AgentSinks, BoxedAgent, CanUseTool,
    PermissionDecision,
};
pub use builtin::*;
pub use registry::{AgentEntry, AgentError, AgentFactory, AgentInfo, AgentRegistry};
