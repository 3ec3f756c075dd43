//! Tab-scoped execution.
//!
//! - [`TabExecutionManager`] admits at most one execution per tab and queues
//!   the rest in arrival order
//! - [`TabExecutor`] runs registered agents through that manager and reports
//!   every outcome both as a return value and on the event bus

mod executor;
mod manager;
mod types;

pub use executor::TabExecutor;
pub use manager::{ManagerStats, TabExecutionManager, TabStats, TabStatus};
pub use types::{
    ExecutionContext, ExecutionError, ExecutionHandle, ExecutionRequest, ExecutionResult,
    SessionState,
};
