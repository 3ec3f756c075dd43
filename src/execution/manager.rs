//! Per-tab admission control.
//!
//! Each tab owns a single execution slot. A request arriving while the slot
//! is taken waits in that tab's FIFO queue; when the running execution
//! settles, the slot passes directly to the head of the queue. Tabs never
//! share state, so activity on one tab cannot delay another.
//!
//! The slot is an RAII guard: however an execution ends (result, error,
//! panic, timeout, or the caller dropping its future), the tab returns to
//! idle and the queue drains.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::types::{
    ExecutionContext, ExecutionError, ExecutionHandle, ExecutionRequest, ExecutionResult,
    SessionState,
};

/// Whether a tab is running an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    #[default]
    Idle,
    Busy,
}

/// A request waiting for its tab. Owned by the manager until dequeued.
struct QueuedExecution {
    request: ExecutionRequest,
    /// `Ok` hands over the slot, `Err` rejects the waiting caller.
    permit: oneshot::Sender<Result<Permit, ExecutionError>>,
}

#[derive(Default)]
struct TabState {
    status: TabStatus,
    queue: VecDeque<QueuedExecution>,
    current_execution: Option<ExecutionHandle>,
    session: Option<SessionState>,
}

impl TabState {
    fn occupy(&mut self, agent_id: &str) {
        self.status = TabStatus::Busy;
        self.current_execution = Some(ExecutionHandle::new(agent_id));
    }

    fn vacate(&mut self) {
        self.status = TabStatus::Idle;
        self.current_execution = None;
    }

    fn waiting(&self) -> usize {
        self.queue.iter().filter(|q| !q.permit.is_closed()).count()
    }
}

/// The right to run one request on a tab.
struct Permit {
    slot: TabSlot,
    request: ExecutionRequest,
}

/// Occupancy of a tab's execution slot; dropping it idles the tab and
/// admits the next queued request.
struct TabSlot {
    manager: TabExecutionManager,
    tab_id: String,
    armed: bool,
}

impl TabSlot {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TabSlot {
    fn drop(&mut self) {
        if self.armed {
            self.manager.release(&self.tab_id);
        }
    }
}

enum Admission {
    Immediate(Permit),
    Queued(oneshot::Receiver<Result<Permit, ExecutionError>>),
}

/// Serializes executions per tab.
#[derive(Clone, Default)]
pub struct TabExecutionManager {
    tabs: Arc<Mutex<HashMap<String, TabState>>>,
    execution_timeout: Option<Duration>,
}

impl TabExecutionManager {
    /// Create a manager without an execution timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail executions that run longer than `timeout`.
    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TabState>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `executor` on a tab, waiting behind earlier requests if it is busy.
    ///
    /// When the tab is idle the executor runs immediately and an executor
    /// error comes back as a failed [`ExecutionResult`]. A request that had
    /// to queue is rejected instead: with [`ExecutionError::Cancelled`] when
    /// [`cancel_queue`](Self::cancel_queue) removes it, or with the
    /// executor's own error when its run fails.
    pub async fn execute<F, Fut>(
        &self,
        tab_id: impl Into<String>,
        agent_id: impl Into<String>,
        user_input: impl Into<String>,
        context: ExecutionContext,
        executor: F,
    ) -> Result<ExecutionResult, ExecutionError>
    where
        F: FnOnce(ExecutionRequest) -> Fut,
        Fut: Future<Output = Result<ExecutionResult, ExecutionError>>,
    {
        let request = ExecutionRequest {
            tab_id: tab_id.into(),
            agent_id: agent_id.into(),
            user_input: user_input.into(),
            context,
        };
        let tab_id = request.tab_id.clone();

        match self.admit(request) {
            Admission::Immediate(permit) => Ok(self
                .execute_immediate(permit, executor)
                .await
                .unwrap_or_else(|e| ExecutionResult::failed(e.to_string()))),
            Admission::Queued(waiting) => {
                // A vanished sender means the manager discarded the request.
                let permit = waiting
                    .await
                    .map_err(|_| ExecutionError::Cancelled { tab_id })??;
                self.execute_immediate(permit, executor).await
            }
        }
    }

    fn admit(&self, request: ExecutionRequest) -> Admission {
        let mut tabs = self.lock();
        let state = tabs.entry(request.tab_id.clone()).or_default();

        match state.status {
            TabStatus::Idle => {
                state.occupy(&request.agent_id);
                debug!(tab_id = %request.tab_id, agent_id = %request.agent_id, "Executing immediately");
                Admission::Immediate(Permit {
                    slot: TabSlot {
                        manager: self.clone(),
                        tab_id: request.tab_id.clone(),
                        armed: true,
                    },
                    request,
                })
            }
            TabStatus::Busy => {
                let (tx, rx) = oneshot::channel();
                debug!(
                    tab_id = %request.tab_id,
                    agent_id = %request.agent_id,
                    position = state.queue.len() + 1,
                    "Tab busy, queueing request"
                );
                state.queue.push_back(QueuedExecution {
                    request,
                    permit: tx,
                });
                Admission::Queued(rx)
            }
        }
    }

    async fn execute_immediate<F, Fut>(
        &self,
        permit: Permit,
        executor: F,
    ) -> Result<ExecutionResult, ExecutionError>
    where
        F: FnOnce(ExecutionRequest) -> Fut,
        Fut: Future<Output = Result<ExecutionResult, ExecutionError>>,
    {
        let Permit { slot, mut request } = permit;
        if request.context.session.is_none() {
            request.context.session = self.get_session(&request.tab_id);
        }
        let tab_id = request.tab_id.clone();

        let running = executor(request);
        let outcome = match self.execution_timeout {
            Some(limit) => match tokio::time::timeout(limit, running).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(tab_id = %tab_id, timeout = ?limit, "Execution timed out");
                    Ok(ExecutionResult::failed(
                        ExecutionError::TimedOut(limit).to_string(),
                    ))
                }
            },
            None => running.await,
        };

        match &outcome {
            Ok(ExecutionResult {
                success: true,
                session_id: Some(session_id),
                ..
            }) => self.set_session(&tab_id, SessionState::new(session_id.as_str())),
            Ok(_) => {}
            Err(e) => warn!(tab_id = %tab_id, error = %e, "Executor failed"),
        }

        drop(slot);
        outcome
    }

    /// Idle the tab, then hand the slot to the oldest live waiter.
    fn release(&self, tab_id: &str) {
        loop {
            let next = {
                let mut tabs = self.lock();
                let Some(state) = tabs.get_mut(tab_id) else {
                    return;
                };
                state.vacate();
                match state.queue.pop_front() {
                    Some(next) => {
                        state.occupy(&next.request.agent_id);
                        next
                    }
                    None => {
                        debug!(tab_id = %tab_id, "Tab idle");
                        return;
                    }
                }
            };

            debug!(tab_id = %tab_id, agent_id = %next.request.agent_id, "Dequeued request");
            let permit = Permit {
                slot: TabSlot {
                    manager: self.clone(),
                    tab_id: tab_id.to_string(),
                    armed: true,
                },
                request: next.request,
            };
            match next.permit.send(Ok(permit)) {
                Ok(()) => return,
                // The waiter gave up; reclaim the slot here and try the next one.
                Err(Ok(permit)) => permit.slot.disarm(),
                Err(Err(_)) => {}
            }
        }
    }

    /// Reject every request still waiting on a tab.
    ///
    /// The running execution is not affected. Returns how many were rejected.
    pub fn cancel_queue(&self, tab_id: &str) -> usize {
        let drained: Vec<QueuedExecution> = {
            let mut tabs = self.lock();
            match tabs.get_mut(tab_id) {
                Some(state) => state.queue.drain(..).collect(),
                None => Vec::new(),
            }
        };

        let mut rejected = 0;
        for queued in drained {
            let error = ExecutionError::Cancelled {
                tab_id: tab_id.to_string(),
            };
            if queued.permit.send(Err(error)).is_ok() {
                rejected += 1;
            }
        }
        debug!(tab_id = %tab_id, rejected, "Cancelled queued requests");
        rejected
    }

    /// Whether a tab has no execution in flight. Unknown tabs are idle.
    pub fn is_idle(&self, tab_id: &str) -> bool {
        self.status(tab_id) == TabStatus::Idle
    }

    pub fn status(&self, tab_id: &str) -> TabStatus {
        self.lock()
            .get(tab_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Number of requests waiting on a tab.
    pub fn get_queue_length(&self, tab_id: &str) -> usize {
        self.lock().get(tab_id).map_or(0, TabState::waiting)
    }

    /// The execution currently holding a tab.
    pub fn current_execution(&self, tab_id: &str) -> Option<ExecutionHandle> {
        self.lock()
            .get(tab_id)
            .and_then(|s| s.current_execution.clone())
    }

    pub fn get_session(&self, tab_id: &str) -> Option<SessionState> {
        self.lock().get(tab_id).and_then(|s| s.session.clone())
    }

    pub fn set_session(&self, tab_id: &str, session: SessionState) {
        debug!(tab_id = %tab_id, session_id = %session.id, "Session updated");
        self.lock().entry(tab_id.to_string()).or_default().session = Some(session);
    }

    /// Forget a tab's session so the next execution starts fresh.
    pub fn clear_session(&self, tab_id: &str) -> Option<SessionState> {
        self.lock().get_mut(tab_id).and_then(|s| s.session.take())
    }

    /// Seed `to_tab` with a fork of `from_tab`'s session.
    pub fn fork_session(&self, from_tab: &str, to_tab: &str) -> Option<SessionState> {
        let forked = self.get_session(from_tab)?.forked();
        self.set_session(to_tab, forked.clone());
        Some(forked)
    }

    /// Snapshot of every known tab.
    pub fn get_stats(&self) -> ManagerStats {
        let tabs = self.lock();
        let mut per_tab: Vec<TabStats> = tabs
            .iter()
            .map(|(tab_id, state)| TabStats {
                tab_id: tab_id.clone(),
                status: state.status,
                queue_length: state.waiting(),
                current_agent: state.current_execution.as_ref().map(|h| h.agent_id.clone()),
                session_id: state.session.as_ref().map(|s| s.id.clone()),
            })
            .collect();
        per_tab.sort_by(|a, b| a.tab_id.cmp(&b.tab_id));

        ManagerStats {
            tabs: per_tab.len(),
            busy_tabs: per_tab
                .iter()
                .filter(|t| t.status == TabStatus::Busy)
                .count(),
            queued: per_tab.iter().map(|t| t.queue_length).sum(),
            per_tab,
        }
    }
}

/// Aggregate manager state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub tabs: usize,
    pub busy_tabs: usize,
    pub queued: usize,
    pub per_tab: Vec<TabStats>,
}

/// State of one tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabStats {
    pub tab_id: String,
    pub status: TabStatus,
    pub queue_length: usize,
    pub current_agent: Option<String>,
    pub session_id: Option<String>,
}
