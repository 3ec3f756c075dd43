//! Echo Agent - streams the user's input back, one word at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::agents::{
    Agent, AgentCompletion, AgentEntry, AgentError, AgentHandle, AgentSinks, BoxedAgent,
    PermissionDecision,
};
use crate::execution::ExecutionContext;

pub const ECHO_AGENT_ID: &str = "echo";

/// Echo Agent - a dependency-free agent for wiring checks and demos.
///
/// Continues the context's session unless it was forked, in which case a
/// fresh session id is minted.
pub struct EchoAgent;

impl EchoAgent {
    pub fn entry() -> AgentEntry {
        AgentEntry::new(
            ECHO_AGENT_ID,
            "Streams the input back word by word",
            || Ok(Box::new(EchoAgent) as BoxedAgent),
        )
        .with_tags(["builtin", "debug"])
    }
}

impl Agent for EchoAgent {
    fn start(
        &self,
        user_input: &str,
        context: ExecutionContext,
        sinks: AgentSinks,
    ) -> Result<AgentHandle, AgentError> {
        let session_id = match &context.session {
            Some(session) if !session.forked => session.id.clone(),
            _ => format!("echo-{}", uuid::Uuid::new_v4()),
        };
        let input = user_input.to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let resolved = session_id.clone();

        let completion = async move {
            sinks.on_session_id(&resolved);

            let decision = sinks.can_use_tool("echo", &json!({ "text": input })).await;
            if let PermissionDecision::Deny { message } = decision {
                sinks.on_failed(&message);
                return Err(AgentError::Execution(message));
            }

            let words: Vec<&str> = input.split_whitespace().collect();
            sinks.on_reasoning(format!("Echoing {} words", words.len()));

            for (i, word) in words.iter().enumerate() {
                if flag.load(Ordering::SeqCst) {
                    sinks.on_failed("cancelled");
                    return Err(AgentError::Cancelled);
                }
                let chunk = if i == 0 {
                    word.to_string()
                } else {
                    format!(" {}", word)
                };
                sinks.on_text(chunk);
                tokio::task::yield_now().await;
            }

            let output = words.join(" ");
            sinks.on_completed(&output);
            Ok(AgentCompletion {
                output,
                session_id: Some(resolved),
            })
        };

        Ok(AgentHandle::new(completion)
            .with_session_id(session_id)
            .with_cancel(move || cancelled.store(true, Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{allow_all, CanUseTool};
    use crate::execution::SessionState;
    use crate::messaging::AgentOutput;
    use futures::FutureExt;
    use std::sync::Mutex;

    fn sinks_with(can_use_tool: CanUseTool) -> (AgentSinks, Arc<Mutex<Vec<AgentOutput>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            AgentSinks::new(Arc::new(move |o| sink.lock().unwrap().push(o)), can_use_tool),
            seen,
        )
    }

    #[tokio::test]
    async fn test_echo_streams_words() {
        let (sinks, seen) = sinks_with(allow_all());
        let handle = EchoAgent
            .start("hello  tab world", ExecutionContext::new("main"), sinks)
            .unwrap();
        let completion = handle.wait().await.unwrap();

        assert_eq!(completion.output, "hello tab world");
        let text: String = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| match o {
                AgentOutput::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hello tab world");
        assert!(matches!(
            seen.lock().unwrap().last(),
            Some(AgentOutput::Completed(t)) if t == "hello tab world"
        ));
    }

    #[tokio::test]
    async fn test_echo_continues_session() {
        let (sinks, _) = sinks_with(allow_all());
        let context = ExecutionContext::new("main").with_session(SessionState::new("s1"));
        let handle = EchoAgent.start("hi", context, sinks).unwrap();

        assert_eq!(handle.session_id(), Some("s1"));
        assert_eq!(handle.wait().await.unwrap().session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_echo_forked_session_gets_new_id() {
        let (sinks, _) = sinks_with(allow_all());
        let context = ExecutionContext::new("bg").with_session(SessionState::new("s1").forked());
        let completion = EchoAgent.start("hi", context, sinks).unwrap().wait().await.unwrap();

        let id = completion.session_id.unwrap();
        assert_ne!(id, "s1");
        assert!(id.starts_with("echo-"));
    }

    #[tokio::test]
    async fn test_echo_respects_permission_denial() {
        let deny: CanUseTool = Arc::new(|_, _| {
            async {
                PermissionDecision::Deny {
                    message: "echo disabled".into(),
                }
            }
            .boxed()
        });
        let (sinks, seen) = sinks_with(deny);
        let result = EchoAgent
            .start("hi", ExecutionContext::new("main"), sinks)
            .unwrap()
            .wait()
            .await;

        assert!(matches!(result, Err(AgentError::Execution(ref m)) if m == "echo disabled"));
        assert!(seen
            .lock()
            .unwrap()
            .contains(&AgentOutput::Failed("echo disabled".into())));
    }

    #[tokio::test]
    async fn test_echo_cancel_stops_streaming() {
        let (sinks, _) = sinks_with(allow_all());
        let mut handle = EchoAgent
            .start("one two three", ExecutionContext::new("main"), sinks)
            .unwrap();
        handle.cancel();

        assert!(matches!(handle.wait().await, Err(AgentError::Cancelled)));
    }
}
