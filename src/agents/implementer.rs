//! Implementer: carries out the current task with tools.

use async_trait::async_trait;
use std::sync::Arc;

use super::{deliverables_list, run_tool_loop, Agent, AgentError};
use crate::llm::{AgentRole, ChatMessage, ModelRouter};
use crate::orchestrator::{ErrorTag, OrchestrationState, StateUpdate};
use crate::task::Task;
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_ROUNDS: usize = 30;

const IMPLEMENTER_SYSTEM: &str = "You are the Implementer agent.

You have tools for reading, writing and editing files, searching code, and running
allow-listed shell commands in the project root.

Implement the assigned task:
1. Read the relevant existing code to understand the codebase
2. Write or modify files to produce every listed deliverable
3. Run the project's typecheck, lint or tests to verify your changes
4. Follow the conventions already used in the project

When you are done, respond with a short summary of what you changed.
Do NOT commit. The Committer handles that.";

pub struct Implementer {
    router: Arc<ModelRouter>,
    tools: Arc<ToolRegistry>,
    max_rounds: usize,
}

impl Implementer {
    pub fn new(router: Arc<ModelRouter>, tools: Arc<ToolRegistry>, max_rounds: usize) -> Self {
        Self {
            router,
            tools,
            max_rounds,
        }
    }
}

fn instruction(task: &Task) -> String {
    let spec = task
        .spec
        .as_deref()
        .map(|s| format!("\n\nSpec reference: {}", s))
        .unwrap_or_default();
    format!(
        "Task: {} - {}\n\nDeliverables:\n{}{}\n\nImplement this task now. Use the available tools to read existing code, write new files, and verify your changes.",
        task.id,
        task.title,
        deliverables_list(&task.deliverables, "See spec for details."),
        spec
    )
}

#[async_trait]
impl Agent for Implementer {
    fn role(&self) -> AgentRole {
        AgentRole::Implementer
    }

    async fn run(&self, state: &OrchestrationState) -> Result<StateUpdate, AgentError> {
        let Some(task) = state.current_task.as_ref() else {
            tracing::error!("Implementer invoked without a selected task");
            return Ok(StateUpdate::error(ErrorTag::NoTask));
        };

        let request = ChatMessage::user(instruction(task));
        let mut transcript = state.messages.clone();
        transcript.push(request.clone());

        let outcome = run_tool_loop(
            &self.router,
            AgentRole::Implementer,
            IMPLEMENTER_SYSTEM,
            &transcript,
            &self.tools,
            self.max_rounds,
        )
        .await?;

        if outcome.final_response.is_some() {
            tracing::info!(task_id = %task.id, rounds = outcome.rounds, "Implementer finished");
        } else {
            tracing::warn!(
                task_id = %task.id,
                max_rounds = self.max_rounds,
                "Implementer hit max rounds"
            );
        }

        let mut appended = vec![request];
        appended.extend(outcome.messages);

        Ok(StateUpdate::default()
            .appending(appended)
            .with_git_dirty(true)
            .clear_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::router::testing::{single_provider_router, ScriptedClient};
    use crate::llm::{ChatResponse, Role, ToolCall};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_implementer_writes_and_appends_transcript() {
        let dir = tempdir().unwrap();
        let tools = Arc::new(ToolRegistry::new(dir.path(), vec![]));
        let client = ScriptedClient::new();
        client.push(Ok(ChatResponse {
            tool_calls: Some(vec![ToolCall::new(
                "c1",
                "write_file",
                r#"{"path":"src/index.ts","content":"export {};\n"}"#,
            )]),
            ..Default::default()
        }));
        client.push_text("Created src/index.ts");
        let implementer = Implementer::new(Arc::new(single_provider_router(client)), tools, 30);

        let mut task = Task::new("P1-T1".parse().unwrap(), "Scaffold", "Phase 1: Foundation");
        task.deliverables = vec!["src/index.ts".into()];
        let mut state = OrchestrationState::new(vec![task.clone()]);
        state.current_task = Some(task);
        state.messages = vec![ChatMessage::system("Working on task P1-T1: Scaffold")];
        state.error = Some(ErrorTag::ReviewRejected);

        let update = implementer.run(&state).await.unwrap();
        state.apply(update);

        assert!(dir.path().join("src/index.ts").exists());
        assert!(state.git_dirty);
        assert_eq!(state.error, None);
        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(state.messages[1]
            .text_content()
            .unwrap()
            .contains("Deliverables:\n- src/index.ts"));
    }

    #[tokio::test]
    async fn test_implementer_without_task() {
        let dir = tempdir().unwrap();
        let implementer = Implementer::new(
            Arc::new(single_provider_router(ScriptedClient::new())),
            Arc::new(ToolRegistry::new(dir.path(), vec![])),
            30,
        );
        let update = implementer.run(&OrchestrationState::new(vec![])).await.unwrap();
        assert_eq!(update.error, Some(Some(ErrorTag::NoTask)));
    }
}
