//! Role executors.
//!
//! Each role reads the orchestration state and returns a [`StateUpdate`]; none
//! of them mutates state directly. The Implementer and Reviewer share the
//! bounded tool-calling loop in this module.

mod committer;
mod implementer;
mod planner;
mod reviewer;

pub use committer::Committer;
pub use implementer::{Implementer, DEFAULT_MAX_ROUNDS as IMPLEMENTER_MAX_ROUNDS};
pub use planner::Planner;
pub use reviewer::{classify_verdict, Reviewer, Verdict, DEFAULT_MAX_ROUNDS as REVIEWER_MAX_ROUNDS};

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{AgentRole, ChatMessage, ChatResponse, ModelRouter, RouterError};
use crate::orchestrator::{OrchestrationState, StateUpdate};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// A role in the control loop.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn run(&self, state: &OrchestrationState) -> Result<StateUpdate, AgentError>;
}

/// Result of a tool-calling loop.
#[derive(Debug)]
pub(crate) struct LoopOutcome {
    /// Messages produced during the loop, in order.
    pub messages: Vec<ChatMessage>,
    /// The tool-call-free response that ended the loop, if any.
    pub final_response: Option<ChatResponse>,
    pub rounds: usize,
}

/// Drive the model until it answers without tool calls or `max_rounds` is hit.
///
/// Each request is the role's system prompt, then `transcript`, then whatever
/// the loop has produced so far.
pub(crate) async fn run_tool_loop(
    router: &ModelRouter,
    role: AgentRole,
    system_prompt: &str,
    transcript: &[ChatMessage],
    tools: &ToolRegistry,
    max_rounds: usize,
) -> Result<LoopOutcome, RouterError> {
    let definitions = tools.definitions();
    let mut request: Vec<ChatMessage> = Vec::with_capacity(transcript.len() + 1);
    request.push(ChatMessage::system(system_prompt));
    request.extend_from_slice(transcript);
    let base_len = request.len();

    for round in 1..=max_rounds {
        let response = router.invoke(role, &request, Some(&definitions)).await?;
        request.push(ChatMessage::assistant(&response));

        if response.requested_tool_calls().is_empty() {
            return Ok(LoopOutcome {
                messages: request.split_off(base_len),
                final_response: Some(response),
                rounds: round,
            });
        }

        for call in response.requested_tool_calls() {
            let output = tools.dispatch(call).await;
            tracing::debug!(agent = %role, tool = %call.function.name, round, "Tool called");
            request.push(ChatMessage::tool_result(call.id.clone(), output));
        }
    }

    Ok(LoopOutcome {
        messages: request.split_off(base_len),
        final_response: None,
        rounds: max_rounds,
    })
}

/// Bullet list of deliverables, or `fallback` when there are none.
pub(crate) fn deliverables_list(deliverables: &[String], fallback: &str) -> String {
    if deliverables.is_empty() {
        fallback.to_string()
    } else {
        deliverables
            .iter()
            .map(|d| format!("- {}", d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::router::testing::{single_provider_router, ScriptedClient};
    use crate::llm::{Role, ToolCall};
    use tempfile::tempdir;

    fn tool_call_response(calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_loop_dispatches_tools_and_stops_on_text() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "remember").unwrap();
        let tools = ToolRegistry::new(dir.path(), vec![]);

        let client = ScriptedClient::new();
        client.push(Ok(tool_call_response(vec![
            ToolCall::new("c1", "read_file", r#"{"path":"notes.md"}"#),
            ToolCall::new("c2", "no_such_tool", "{}"),
        ])));
        client.push_text("All done.");
        let router = single_provider_router(client.clone());

        let outcome = run_tool_loop(
            &router,
            AgentRole::Implementer,
            "system",
            &[ChatMessage::user("do it")],
            &tools,
            5,
        )
        .await
        .unwrap();

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.final_response.unwrap().content_text(), "All done.");
        let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(outcome.messages[1].text_content(), Some("remember"));
        assert_eq!(outcome.messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(
            outcome.messages[2].text_content(),
            Some("Error: Unknown tool 'no_such_tool'")
        );

        // Second request carried the system prompt, the transcript and round one.
        let transcripts = client.transcripts();
        assert_eq!(transcripts[1].len(), 5);
        assert_eq!(transcripts[1][0], ChatMessage::system("system"));
    }

    #[tokio::test]
    async fn test_loop_stops_at_round_limit() {
        let dir = tempdir().unwrap();
        let tools = ToolRegistry::new(dir.path(), vec![]);
        let client = ScriptedClient::new();
        for i in 0..3 {
            client.push(Ok(tool_call_response(vec![ToolCall::new(
                format!("c{i}"),
                "list_directory",
                "{}",
            )])));
        }
        let router = single_provider_router(client.clone());

        let outcome = run_tool_loop(&router, AgentRole::Reviewer, "s", &[], &tools, 2)
            .await
            .unwrap();
        assert!(outcome.final_response.is_none());
        assert_eq!(outcome.rounds, 2);
        assert_eq!(client.calls().len(), 2);
    }

    #[test]
    fn test_deliverables_list() {
        assert_eq!(deliverables_list(&[], "See spec."), "See spec.");
        assert_eq!(
            deliverables_list(&["a.ts".into(), "b.ts".into()], ""),
            "- a.ts\n- b.ts"
        );
    }
}
