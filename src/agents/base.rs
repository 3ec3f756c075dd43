//! Agent contract: what the core hands an agent and what it gets back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::AgentError;
use crate::execution::ExecutionContext;
use crate::messaging::{AgentNotice, AgentOutput};

/// Trait for every runnable agent.
pub trait Agent: Send + Sync {
    /// Begin work on `user_input`, reporting output through `sinks`.
    ///
    /// An `Err` means the agent could not start at all; failures after
    /// start are reported through the returned handle.
    fn start(
        &self,
        user_input: &str,
        context: ExecutionContext,
        sinks: AgentSinks,
    ) -> Result<AgentHandle, AgentError>;
}

/// Boxed agent for dynamic dispatch.
pub type BoxedAgent = Box<dyn Agent>;

/// Outcome of a tool permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allow,
    Deny { message: String },
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }
}

/// Permission callback consulted before an agent uses a tool.
pub type CanUseTool =
    Arc<dyn Fn(&str, &Value) -> BoxFuture<'static, PermissionDecision> + Send + Sync>;

/// Permission callback that approves every tool.
pub fn allow_all() -> CanUseTool {
    Arc::new(|_, _| async { PermissionDecision::Allow }.boxed())
}

/// Callback set an agent uses to report output.
#[derive(Clone)]
pub struct AgentSinks {
    output: Arc<dyn Fn(AgentOutput) + Send + Sync>,
    can_use_tool: CanUseTool,
}

impl AgentSinks {
    pub fn new(output: Arc<dyn Fn(AgentOutput) + Send + Sync>, can_use_tool: CanUseTool) -> Self {
        Self {
            output,
            can_use_tool,
        }
    }

    /// Report any output variant.
    pub fn emit(&self, output: AgentOutput) {
        (self.output)(output)
    }

    pub fn on_text(&self, chunk: impl Into<String>) {
        self.emit(AgentOutput::Text(chunk.into()));
    }

    pub fn on_reasoning(&self, chunk: impl Into<String>) {
        self.emit(AgentOutput::Reasoning(chunk.into()));
    }

    pub fn on_event(&self, notice: AgentNotice) {
        self.emit(AgentOutput::Event(notice));
    }

    pub fn on_completed(&self, full_text: impl Into<String>) {
        self.emit(AgentOutput::Completed(full_text.into()));
    }

    pub fn on_failed(&self, error: impl Into<String>) {
        self.emit(AgentOutput::Failed(error.into()));
    }

    pub fn on_session_id(&self, session_id: impl Into<String>) {
        self.emit(AgentOutput::SessionResolved(session_id.into()));
    }

    /// Ask whether a tool may be used with the given input.
    pub async fn can_use_tool(&self, tool_name: &str, input: &Value) -> PermissionDecision {
        (self.can_use_tool)(tool_name, input).await
    }
}

impl fmt::Debug for AgentSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSinks").finish_non_exhaustive()
    }
}

/// Terminal output of a finished agent run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentCompletion {
    pub output: String,
    pub session_id: Option<String>,
}

/// Handle to a started agent.
pub struct AgentHandle {
    session_id: Option<String>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
    completion: BoxFuture<'static, Result<AgentCompletion, AgentError>>,
}

impl AgentHandle {
    pub fn new<F>(completion: F) -> Self
    where
        F: Future<Output = Result<AgentCompletion, AgentError>> + Send + 'static,
    {
        Self {
            session_id: None,
            cancel: None,
            completion: completion.boxed(),
        }
    }

    /// Session id known when the agent started.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_cancel<F>(mut self, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel = Some(Box::new(cancel));
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Ask the agent to stop. Only the first call has an effect.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Wait for the run to settle.
    ///
    /// A session id reported at completion wins over the one known at start.
    pub async fn wait(self) -> Result<AgentCompletion, AgentError> {
        let started_with = self.session_id;
        let mut completion = self.completion.await?;
        if completion.session_id.is_none() {
            completion.session_id = started_with;
        }
        Ok(completion)
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("session_id", &self.session_id)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn recording_sinks() -> (AgentSinks, Arc<Mutex<Vec<AgentOutput>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sinks = AgentSinks::new(
            Arc::new(move |o| sink.lock().unwrap().push(o)),
            allow_all(),
        );
        (sinks, seen)
    }

    #[test]
    fn test_sinks_map_to_outputs() {
        let (sinks, seen) = recording_sinks();
        sinks.on_text("a");
        sinks.on_reasoning("b");
        sinks.on_event(AgentNotice::info("c"));
        sinks.on_session_id("s");
        sinks.on_completed("done");
        sinks.on_failed("err");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AgentOutput::Text("a".into()),
                AgentOutput::Reasoning("b".into()),
                AgentOutput::Event(AgentNotice::info("c")),
                AgentOutput::SessionResolved("s".into()),
                AgentOutput::Completed("done".into()),
                AgentOutput::Failed("err".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_allow_all_permits_everything() {
        let (sinks, _) = recording_sinks();
        let decision = sinks.can_use_tool("shell", &json!({"cmd": "ls"})).await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_custom_permission_callback() {
        let deny_shell: CanUseTool = Arc::new(|tool, _| {
            let decision = if tool == "shell" {
                PermissionDecision::Deny {
                    message: "no shell".into(),
                }
            } else {
                PermissionDecision::Allow
            };
            async move { decision }.boxed()
        });
        let sinks = AgentSinks::new(Arc::new(|_| {}), deny_shell);

        assert!(!sinks.can_use_tool("shell", &json!({})).await.is_allowed());
        assert!(sinks.can_use_tool("read", &json!({})).await.is_allowed());
    }

    #[tokio::test]
    async fn test_handle_completion_session_wins() {
        let handle = AgentHandle::new(async {
            Ok(AgentCompletion {
                output: "x".into(),
                session_id: Some("late".into()),
            })
        })
        .with_session_id("early");

        assert_eq!(handle.session_id(), Some("early"));
        assert_eq!(handle.wait().await.unwrap().session_id.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_handle_falls_back_to_start_session() {
        let handle = AgentHandle::new(async { Ok(AgentCompletion::default()) })
            .with_session_id("early");
        assert_eq!(handle.wait().await.unwrap().session_id.as_deref(), Some("early"));
    }

    #[tokio::test]
    async fn test_handle_propagates_error() {
        let handle = AgentHandle::new(async { Err(AgentError::Execution("boom".into())) });
        assert!(matches!(handle.wait().await, Err(AgentError::Execution(_))));
    }

    #[test]
    fn test_cancel_runs_once() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let mut handle = AgentHandle::new(async { Ok(AgentCompletion::default()) })
            .with_cancel(move || flag.store(true, Ordering::SeqCst));

        handle.cancel();
        handle.cancel();
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
