//! Runs agents on tabs.
//!
//! [`TabExecutor`] is the entry point other layers call. It hands the
//! queueing to [`TabExecutionManager`] and supplies the work itself: build
//! the agent, wire its sinks to the bus, wait for it, and fold whatever
//! happens into an [`ExecutionResult`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use super::manager::TabExecutionManager;
use super::types::{ExecutionContext, ExecutionError, ExecutionRequest, ExecutionResult};
use crate::agents::{allow_all, AgentCompletion, AgentError, AgentRegistry};
use crate::messaging::{EventBus, MessageAdapter};

/// Reported when a run is dropped before the agent settled, e.g. by the
/// watchdog or by a caller that stopped waiting.
const INTERRUPTED: &str = "Execution interrupted before the agent finished";

/// Publishes `agent:failed` for a run that is dropped while unsettled.
struct UnsettledRun<'a> {
    adapter: &'a MessageAdapter,
    settled: bool,
}

impl Drop for UnsettledRun<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            tab_id = %self.adapter.tab_id(),
            agent_id = %self.adapter.agent_id(),
            "Agent run dropped before it finished"
        );
        if let Err(e) = self.adapter.fail_once(INTERRUPTED) {
            error!(tab_id = %self.adapter.tab_id(), error = %e, "Could not publish agent failure");
        }
    }
}

/// Binds tab queueing to agent instantiation and event emission.
#[derive(Clone)]
pub struct TabExecutor {
    manager: TabExecutionManager,
    registry: Arc<AgentRegistry>,
    bus: EventBus,
}

impl TabExecutor {
    pub fn new(manager: TabExecutionManager, registry: Arc<AgentRegistry>, bus: EventBus) -> Self {
        Self {
            manager,
            registry,
            bus,
        }
    }

    pub fn manager(&self) -> &TabExecutionManager {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run `agent_id` on `tab_id`, queueing behind earlier work on that tab.
    ///
    /// Agent failures come back as `Ok` with `success: false` and are also
    /// published as `agent:failed`. `Err` is reserved for requests that never
    /// ran: invalid input, or a queued request removed by
    /// [`TabExecutionManager::cancel_queue`].
    pub async fn execute(
        &self,
        tab_id: &str,
        agent_id: &str,
        user_input: &str,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        if tab_id.trim().is_empty() {
            return Err(ExecutionError::InvalidContext(
                "tab id is required".to_string(),
            ));
        }
        if agent_id.trim().is_empty() {
            return Err(ExecutionError::InvalidContext(
                "agent id is required".to_string(),
            ));
        }
        context.validate()?;

        self.manager
            .execute(tab_id, agent_id, user_input, context, |request| {
                self.execute_agent(request)
            })
            .await
    }

    /// Body of one admitted execution. Never returns `Err`.
    async fn execute_agent(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let ExecutionRequest {
            tab_id,
            agent_id,
            user_input,
            mut context,
        } = request;

        if context.session.is_none() {
            context.session = self.manager.get_session(&tab_id);
        }

        let adapter = MessageAdapter::new(self.bus.clone(), &tab_id, &agent_id)
            .with_parent(context.parent_agent_id.clone());

        debug!(tab_id = %tab_id, agent_id = %agent_id, "Starting agent");
        let mut guard = UnsettledRun {
            adapter: &adapter,
            settled: false,
        };
        let run = self.run_agent(&agent_id, &user_input, context, &adapter);
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(AgentError::Execution("agent panicked".to_string())),
        };
        guard.settled = true;

        match outcome {
            Ok(completion) => {
                debug!(
                    tab_id = %tab_id,
                    agent_id = %agent_id,
                    session_id = ?completion.session_id,
                    "Agent completed"
                );
                Ok(ExecutionResult::succeeded(completion.session_id))
            }
            Err(e) => {
                warn!(tab_id = %tab_id, agent_id = %agent_id, error = %e, "Agent execution failed");
                let message = e.to_string();
                // The agent may already have reported through its sinks.
                if let Err(emit_err) = adapter.fail_once(&message) {
                    error!(tab_id = %tab_id, error = %emit_err, "Could not publish agent failure");
                }
                Ok(ExecutionResult::failed(message))
            }
        }
    }

    async fn run_agent(
        &self,
        agent_id: &str,
        user_input: &str,
        context: ExecutionContext,
        adapter: &MessageAdapter,
    ) -> Result<AgentCompletion, AgentError> {
        let agent = self
            .registry
            .create_agent(agent_id)
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;

        let can_use_tool = context.can_use_tool.clone().unwrap_or_else(allow_all);
        let sinks = adapter.create_sinks(can_use_tool);

        let handle = agent.start(user_input, context, sinks)?;
        handle.wait().await
    }
}
