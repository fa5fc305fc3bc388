//! Reviewer: inspects the Implementer's changes and approves or rejects them.

use async_trait::async_trait;
use std::sync::Arc;

use super::{deliverables_list, run_tool_loop, Agent, AgentError};
use crate::llm::{AgentRole, ChatMessage, ModelRouter};
use crate::orchestrator::{ErrorTag, OrchestrationState, StateUpdate};
use crate::task::Task;
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_ROUNDS: usize = 15;

const REVIEWER_SYSTEM: &str = "You are the Reviewer agent.

Review the changes made by the Implementer and decide whether they are ready to commit.

Review criteria:
1. All deliverables from the task are present
2. The code typechecks and lints cleanly
3. No security issues (no exposed secrets, proper input handling)
4. The code follows the conventions already used in the project

Use `git diff` to see what changed, read files to review them, and run the
project's checks.

After reviewing, respond with either:
- APPROVED: followed by a brief summary of the changes
- REJECTED: followed by the specific issues that must be fixed

Only reject for real issues, not style preferences.";

/// Outcome of a review response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected,
    /// Neither keyword present. Treated as approval.
    Unclear,
}

/// Classify a final review text. `APPROVED` wins over `REJECTED`.
pub fn classify_verdict(text: &str) -> Verdict {
    let upper = text.to_uppercase();
    if upper.contains("APPROVED") {
        Verdict::Approved
    } else if upper.contains("REJECTED") {
        Verdict::Rejected
    } else {
        Verdict::Unclear
    }
}

pub struct Reviewer {
    router: Arc<ModelRouter>,
    tools: Arc<ToolRegistry>,
    max_rounds: usize,
}

impl Reviewer {
    pub fn new(router: Arc<ModelRouter>, tools: Arc<ToolRegistry>, max_rounds: usize) -> Self {
        Self {
            router,
            tools,
            max_rounds,
        }
    }
}

fn instruction(task: &Task) -> String {
    format!(
        "Review the changes for task {}: {}\n\nExpected deliverables:\n{}\n\nUse `git diff` and `git diff --cached` to see changes, read files to review them, and run typecheck/lint to verify quality. Then approve or reject.",
        task.id,
        task.title,
        deliverables_list(&task.deliverables, "See task description.")
    )
}

#[async_trait]
impl Agent for Reviewer {
    fn role(&self) -> AgentRole {
        AgentRole::Reviewer
    }

    async fn run(&self, state: &OrchestrationState) -> Result<StateUpdate, AgentError> {
        let Some(task) = state.current_task.as_ref() else {
            tracing::error!("Reviewer invoked without a selected task");
            return Ok(StateUpdate::error(ErrorTag::NoTask));
        };

        let request = ChatMessage::user(instruction(task));
        let mut transcript = state.messages.clone();
        transcript.push(request.clone());

        let outcome = run_tool_loop(
            &self.router,
            AgentRole::Reviewer,
            REVIEWER_SYSTEM,
            &transcript,
            &self.tools,
            self.max_rounds,
        )
        .await?;

        let mut appended = vec![request];
        appended.extend(outcome.messages);
        let update = StateUpdate::default().appending(appended);

        let Some(response) = outcome.final_response else {
            tracing::warn!(task_id = %task.id, "Reviewer hit max rounds, auto-approving");
            return Ok(update.clear_error());
        };

        match classify_verdict(response.content_text()) {
            Verdict::Approved => {
                tracing::info!(task_id = %task.id, "Reviewer approved task");
                Ok(update.clear_error())
            }
            Verdict::Unclear => {
                tracing::info!(
                    task_id = %task.id,
                    "Reviewer gave no explicit verdict, treating as approved"
                );
                Ok(update.clear_error())
            }
            Verdict::Rejected => {
                let retry_count = state.retry_count + 1;
                tracing::info!(task_id = %task.id, retry_count, "Reviewer rejected task");
                Ok(StateUpdate {
                    error: Some(Some(ErrorTag::ReviewRejected)),
                    retry_count: Some(retry_count),
                    ..update
                })
            }
        }
    }
}
