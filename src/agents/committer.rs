//! Committer: records the task's changes as one commit.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentError};
use crate::llm::{AgentRole, ChatMessage, ModelRouter};
use crate::orchestrator::{ErrorTag, OrchestrationState, StateUpdate};
use crate::task::{Task, TaskStatus};
use crate::tools::{truncate_chars, WorkingTree};

/// Characters of diff stat and file list shown to the model.
const MAX_CONTEXT_CHARS: usize = 3_000;

const COMMITTER_SYSTEM: &str = "You are the Committer agent. Generate a conventional commit message for the changes.

Rules:
- Format: type(scope): description
- Types: feat, fix, chore, docs, refactor, test, style
- Scope: the main area changed
- Description: imperative mood, lowercase, no period, under 72 chars

Respond with ONLY the commit message, nothing else.";

pub struct Committer {
    router: Arc<ModelRouter>,
    tree: Arc<dyn WorkingTree>,
}

/// Trim whitespace and one layer of surrounding quotes.
fn clean_message(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

/// User prompt for message generation. Without a diff stat only the task and
/// the changed files are shown.
fn commit_prompt(task: &Task, diff_stat: Option<&str>, status: &str) -> String {
    let mut prompt = format!("Task: {} - {}\n\n", task.id, task.title);
    if let Some(stat) = diff_stat {
        prompt.push_str(&format!(
            "Git diff stat:\n{}\n\n",
            truncate_chars(stat, MAX_CONTEXT_CHARS).0
        ));
    }
    prompt.push_str(&format!(
        "Files changed:\n{}\n\nGenerate the commit message.",
        truncate_chars(status, MAX_CONTEXT_CHARS).0
    ));
    prompt
}

impl Committer {
    pub fn new(router: Arc<ModelRouter>, tree: Arc<dyn WorkingTree>) -> Self {
        Self { router, tree }
    }

    async fn commit_message(&self, task: &Task, status: &str) -> Result<String, AgentError> {
        if let Some(message) = task.commit_message.as_deref().filter(|m| !m.trim().is_empty()) {
            return Ok(message.to_string());
        }

        let diff_stat = match self.tree.diff_stat().await {
            Ok(stat) => Some(stat),
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Could not read diff stat, prompting without it");
                None
            }
        };

        let messages = vec![
            ChatMessage::system(COMMITTER_SYSTEM),
            ChatMessage::user(commit_prompt(task, diff_stat.as_deref(), status)),
        ];
        let response = self.router.invoke(AgentRole::Committer, &messages, None).await?;

        let message = clean_message(response.content_text());
        if message.is_empty() {
            tracing::warn!(task_id = %task.id, "Empty commit message from model, using task title");
            return Ok(format!("chore: {} {}", task.id, task.title));
        }
        Ok(message)
    }
}

#[async_trait]
impl Agent for Committer {
    fn role(&self) -> AgentRole {
        AgentRole::Committer
    }

    async fn run(&self, state: &OrchestrationState) -> Result<StateUpdate, AgentError> {
        let Some(task) = state.current_task.as_ref() else {
            tracing::error!("Committer invoked without a selected task");
            return Ok(StateUpdate::error(ErrorTag::NoTask));
        };

        let status = match self.tree.status_porcelain().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Could not read working tree status");
                return Ok(StateUpdate::error(ErrorTag::CommitFailed(e.to_string())).with_git_dirty(true));
            }
        };

        if status.trim().is_empty() {
            tracing::info!(task_id = %task.id, "No changes to commit");
            return Ok(StateUpdate::default().with_git_dirty(false).clear_error());
        }

        let message = self.commit_message(task, &status).await?;

        match self.tree.commit_all(&message).await {
            Ok(()) => {
                tracing::info!(task_id = %task.id, message = %message, "Committed");
                Ok(StateUpdate::default()
                    .with_status(task.id.clone(), TaskStatus::Done)
                    .with_git_dirty(false)
                    .clear_error())
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Git commit failed");
                Ok(StateUpdate::error(ErrorTag::CommitFailed(e.to_string())).with_git_dirty(true))
            }
        }
    }
}
