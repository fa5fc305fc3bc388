//! Planner: picks the next unblocked task and seeds its transcript.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::{Agent, AgentError};
use crate::llm::{AgentRole, ChatMessage, ModelRouter};
use crate::orchestrator::{ErrorTag, OrchestrationState, StateUpdate, TranscriptUpdate};
use crate::task::{pending, unblocked, Task};
use crate::tools::truncate_chars;

/// Characters of the spec artifact carried into the transcript.
const MAX_SPEC_CHARS: usize = 10_000;

const PLANNER_SYSTEM: &str = "You are the Planner agent of a task orchestrator.

You will receive the full task list with dependencies and statuses, and the list of
currently unblocked tasks. Select the best next task to work on.

Selection criteria:
- Pick tasks from the earliest incomplete phase first
- If several tasks are unblocked, prefer the one that unblocks the most downstream tasks
- Never select a task whose dependencies are not all done

Respond with ONLY the task ID to execute next (e.g. \"P1-T3\").";

pub struct Planner {
    router: Arc<ModelRouter>,
    project_dir: PathBuf,
}

impl Planner {
    pub fn new(router: Arc<ModelRouter>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            router,
            project_dir: project_dir.into(),
        }
    }

    async fn choose<'a>(
        &self,
        state: &OrchestrationState,
        candidates: &[&'a Task],
    ) -> Result<&'a Task, AgentError> {
        let tasks = state
            .tasks
            .iter()
            .map(|t| {
                let deps = if t.depends_on.is_empty() {
                    "nothing".to_string()
                } else {
                    t.depends_on
                        .iter()
                        .map(|d| d.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("- {}: {} (depends on: {})", t.id, t.title, deps)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let statuses = state
            .tasks
            .iter()
            .map(|t| format!("- {}: {}", t.id, state.status_of(&t.id)))
            .collect::<Vec<_>>()
            .join("\n");
        let options = candidates
            .iter()
            .map(|t| format!("- {}: {}", t.id, t.title))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(PLANNER_SYSTEM),
            ChatMessage::user(format!(
                "Tasks:\n{}\n\nStatus:\n{}\n\nUnblocked tasks:\n{}\n\nWhich task should we execute next?",
                tasks, statuses, options
            )),
        ];

        let response = self.router.invoke(AgentRole::Planner, &messages, None).await?;
        Ok(select_from_response(candidates, response.content_text()))
    }

    async fn load_spec(&self, task: &Task) -> Option<String> {
        let spec = task.spec.as_deref()?;
        let path = self.project_dir.join(spec);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(truncate_chars(&content, MAX_SPEC_CHARS).0),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Spec artifact not readable");
                None
            }
        }
    }
}

/// First candidate whose id occurs in `response`; the first candidate otherwise.
///
/// `candidates` must not be empty.
fn select_from_response<'a>(candidates: &[&'a Task], response: &str) -> &'a Task {
    candidates
        .iter()
        .copied()
        .find(|t| response.contains(t.id.as_str()))
        .unwrap_or(candidates[0])
}

#[async_trait]
impl Agent for Planner {
    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    async fn run(&self, state: &OrchestrationState) -> Result<StateUpdate, AgentError> {
        let candidates = unblocked(&state.tasks, &state.task_status);

        if candidates.is_empty() {
            let stuck = pending(&state.tasks, &state.task_status);
            if stuck.is_empty() {
                tracing::info!("All tasks completed");
                return Ok(StateUpdate {
                    current_task: Some(None),
                    ..Default::default()
                }
                .clear_error());
            }
            let ids: Vec<&str> = stuck.iter().map(|t| t.id.as_str()).collect();
            tracing::warn!(pending = ?ids, "No unblocked tasks; remaining tasks are blocked");
            return Ok(StateUpdate {
                current_task: Some(None),
                ..StateUpdate::error(ErrorTag::Blocked)
            });
        }

        let selected = if candidates.len() == 1 {
            candidates[0]
        } else {
            self.choose(state, &candidates).await?
        };

        tracing::info!(task_id = %selected.id, title = %selected.title, "Planner selected task");

        let seed = match self.load_spec(selected).await {
            Some(spec) if !spec.is_empty() => format!("Spec:\n{}", spec),
            _ => "No spec file available.".to_string(),
        };

        Ok(StateUpdate {
            current_task: Some(Some(selected.clone())),
            retry_count: Some(0),
            phase: Some(selected.phase.clone()),
            messages: Some(TranscriptUpdate::Replace(vec![
                ChatMessage::system(format!(
                    "Working on task {}: {}",
                    selected.id, selected.title
                )),
                ChatMessage::user(seed),
            ])),
            ..Default::default()
        }
        .clear_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::router::testing::{single_provider_router, ScriptedClient};
    use crate::task::{TaskId, TaskStatus};
    use tempfile::tempdir;

    fn id(s: &str) -> TaskId {
        s.parse().unwrap()
    }

    fn task(s: &str, deps: &[&str]) -> Task {
        Task::new(id(s), format!("Title {s}"), "Phase 1: Foundation")
            .with_dependencies(deps.iter().map(|d| id(d)))
    }

    fn planner(client: Arc<ScriptedClient>, dir: &std::path::Path) -> Planner {
        Planner::new(Arc::new(single_provider_router(client)), dir)
    }

    #[tokio::test]
    async fn test_single_candidate_skips_model_and_seeds_transcript() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/auth.md"), "# Auth\nUse tokens.").unwrap();

        let mut t1 = task("P1-T1", &[]);
        t1.spec = Some("docs/auth.md".into());
        let mut state = OrchestrationState::new(vec![t1, task("P1-T2", &["P1-T1"])]);
        state.retry_count = 2;
        state.error = Some(ErrorTag::ReviewRejected);

        let client = ScriptedClient::new();
        let update = planner(client.clone(), dir.path()).run(&state).await.unwrap();
        assert!(client.calls().is_empty());

        state.apply(update);
        assert_eq!(state.current_task.as_ref().map(|t| t.id.as_str()), Some("P1-T1"));
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.error, None);
        assert_eq!(state.phase, "Phase 1: Foundation");
        assert_eq!(
            state.messages,
            vec![
                ChatMessage::system("Working on task P1-T1: Title P1-T1"),
                ChatMessage::user("Spec:\n# Auth\nUse tokens."),
            ]
        );
    }

    #[tokio::test]
    async fn test_model_choice_among_candidates() {
        let dir = tempdir().unwrap();
        let state = OrchestrationState::new(vec![task("P1-T1", &[]), task("P1-T2", &[])]);

        let client = ScriptedClient::new();
        client.push_text("Let's go with P1-T2 next.");
        let update = planner(client.clone(), dir.path()).run(&state).await.unwrap();

        let selected = update.current_task.unwrap().unwrap();
        assert_eq!(selected.id.as_str(), "P1-T2");
        assert_eq!(client.calls().len(), 1);
        match update.messages {
            Some(TranscriptUpdate::Replace(seed)) => {
                assert_eq!(seed[1], ChatMessage::user("No spec file available."));
            }
            other => panic!("expected replaced transcript, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unrecognized_choice_falls_back_to_first_candidate() {
        let dir = tempdir().unwrap();
        let state = OrchestrationState::new(vec![task("P1-T1", &[]), task("P1-T2", &[])]);
        let client = ScriptedClient::new();
        client.push_text("DONE");
        let update = planner(client, dir.path()).run(&state).await.unwrap();
        assert_eq!(update.current_task.unwrap().unwrap().id.as_str(), "P1-T1");
    }

    #[tokio::test]
    async fn test_completion_and_deadlock() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new();
        let planner = planner(client, dir.path());

        let mut done = OrchestrationState::new(vec![task("P1-T1", &[])]);
        done.task_status.insert(id("P1-T1"), TaskStatus::Done);
        done.error = Some(ErrorTag::ReviewRejected);
        let mut after = done.clone();
        after.apply(planner.run(&done).await.unwrap());
        assert!(after.current_task.is_none());
        assert_eq!(after.error, None);

        let stuck = OrchestrationState::new(vec![task("P2-T1", &["P1-T7", "P1-T6"])]);
        let mut after = stuck.clone();
        after.apply(planner.run(&stuck).await.unwrap());
        assert!(after.current_task.is_none());
        assert_eq!(after.error, Some(ErrorTag::Blocked));
    }

    #[test]
    fn test_select_from_response_prefers_candidate_order() {
        let a = task("P1-T1", &[]);
        let b = task("P1-T2", &[]);
        let candidates = vec![&a, &b];
        assert_eq!(select_from_response(&candidates, "P1-T2 or P1-T1").id, a.id);
        assert_eq!(select_from_response(&candidates, "p1-t2").id, a.id);
    }
}
