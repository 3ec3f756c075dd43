//! Application wiring.
//!
//! One instance of each component, built once at startup and handed to
//! whatever needs it.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::agents::AgentRegistry;
use crate::config::Settings;
use crate::execution::{
    ExecutionContext, ExecutionError, ExecutionResult, TabExecutionManager, TabExecutor,
};
use crate::history::{HistoryRecorder, MessageStore, SharedMessageStore};
use crate::messaging::EventBus;

/// Owns the bus, the registry, the per-tab manager and the history.
#[derive(Clone)]
pub struct AppContext {
    settings: Settings,
    bus: EventBus,
    registry: Arc<AgentRegistry>,
    executor: TabExecutor,
    history: HistoryRecorder,
}

impl AppContext {
    /// Build every component from `settings` and register the built-in agents.
    pub fn new(settings: Settings) -> Self {
        let bus = EventBus::with_capacity(settings.event_channel_capacity);
        let registry = Arc::new(AgentRegistry::with_builtins());
        let manager =
            TabExecutionManager::new().with_execution_timeout(settings.execution_timeout());
        let executor = TabExecutor::new(manager, Arc::clone(&registry), bus.clone());

        let store = MessageStore::with_limit(&settings.default_tab, settings.invisible_tab_limit);
        let history = HistoryRecorder::new(Arc::new(Mutex::new(store)));
        history.attach(&bus);

        debug!(agents = registry.len(), "Application context ready");
        Self {
            settings,
            bus,
            registry,
            executor,
            history,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &TabExecutor {
        &self.executor
    }

    pub fn manager(&self) -> &TabExecutionManager {
        self.executor.manager()
    }

    pub fn store(&self) -> &SharedMessageStore {
        self.history.store()
    }

    /// Record the user's input on `tab_id` and run `agent_id` on it.
    ///
    /// A request removed from the queue before it ran leaves a boxed notice
    /// after the input it answered.
    pub async fn submit(
        &self,
        tab_id: &str,
        agent_id: &str,
        user_input: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let context = ExecutionContext::new(tab_id);
        context.validate()?;
        self.history.record_user_input(tab_id, user_input);
        let outcome = self
            .executor
            .execute(tab_id, agent_id, user_input, context)
            .await;
        if let Err(e) = &outcome {
            if e.is_cancelled() {
                debug!(tab_id = %tab_id, agent_id = %agent_id, "Request cancelled before it ran");
                self.history
                    .record_notice(tab_id, agent_id, format!("{agent_id} cancelled before it ran"));
            }
        }
        outcome
    }
}
