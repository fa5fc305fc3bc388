//! Orchestration state and the partial updates roles return.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::llm::{ChatMessage, TokenTally};
use crate::task::{initial_status, next_phase, StatusMap, Task, TaskId, TaskStatus};

/// Condition tag carried between nodes and persisted with the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ErrorTag {
    /// A role ran without a selected task.
    NoTask,
    /// Pending tasks remain but none is unblocked.
    Blocked,
    ReviewRejected,
    CommitFailed(String),
    ProviderExhausted(String),
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTask => f.write_str("no_task"),
            Self::Blocked => f.write_str("blocked"),
            Self::ReviewRejected => f.write_str("review_rejected"),
            Self::CommitFailed(detail) => write!(f, "commit_failed: {}", detail),
            Self::ProviderExhausted(detail) => write!(f, "provider_exhausted: {}", detail),
        }
    }
}

/// Everything a run needs to continue after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub tasks: Vec<Task>,
    pub current_task: Option<Task>,
    pub task_status: StatusMap,
    /// Transcript of the current task.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub git_dirty: bool,
    #[serde(default)]
    pub retry_count: u32,
    /// Provider/model that answered the most recent call.
    #[serde(default)]
    pub current_llm: String,
    #[serde(default)]
    pub error: Option<ErrorTag>,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub token_usage: BTreeMap<String, TokenTally>,
    /// Consecutive Committer passes that found nothing to commit, per task.
    #[serde(default)]
    pub clean_passes: BTreeMap<TaskId, u32>,
}

impl OrchestrationState {
    /// Fresh state with statuses taken from each task's completion flag.
    pub fn new(tasks: Vec<Task>) -> Self {
        let task_status = initial_status(&tasks);
        let phase = next_phase(&tasks, &task_status)
            .unwrap_or_default()
            .to_string();
        Self {
            tasks,
            current_task: None,
            task_status,
            messages: Vec::new(),
            git_dirty: false,
            retry_count: 0,
            current_llm: String::new(),
            error: None,
            phase,
            token_usage: BTreeMap::new(),
            clean_passes: BTreeMap::new(),
        }
    }

    pub fn status_of(&self, id: &TaskId) -> TaskStatus {
        self.task_status
            .get(id)
            .copied()
            .unwrap_or(TaskStatus::Pending)
    }

    /// Count of tasks per status, in a fixed display order.
    pub fn status_counts(&self) -> Vec<(TaskStatus, usize)> {
        [
            TaskStatus::Done,
            TaskStatus::Pending,
            TaskStatus::Failed,
            TaskStatus::Blocked,
            TaskStatus::Skipped,
        ]
        .into_iter()
        .map(|status| {
            let count = self
                .tasks
                .iter()
                .filter(|t| self.status_of(&t.id) == status)
                .count();
            (status, count)
        })
        .collect()
    }

    /// Merge a role's update. Fields left unset are untouched.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(task) = update.current_task {
            self.current_task = task;
        }
        for (id, status) in update.status_changes {
            self.task_status.insert(id, status);
        }
        match update.messages {
            Some(TranscriptUpdate::Append(mut messages)) => self.messages.append(&mut messages),
            Some(TranscriptUpdate::Replace(messages)) => self.messages = messages,
            None => {}
        }
        if let Some(dirty) = update.git_dirty {
            self.git_dirty = dirty;
        }
        if let Some(count) = update.retry_count {
            self.retry_count = count;
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        if let Some(phase) = update.phase {
            self.phase = phase;
        }
    }
}

/// How a role changes the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptUpdate {
    /// Add messages after the existing transcript.
    Append(Vec<ChatMessage>),
    /// Start a new transcript. Used when a task is selected.
    Replace(Vec<ChatMessage>),
}

/// Partial state update returned by a role.
///
/// `current_task` and `error` are doubly optional: the outer `None` leaves the
/// field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub current_task: Option<Option<Task>>,
    pub status_changes: Vec<(TaskId, TaskStatus)>,
    pub messages: Option<TranscriptUpdate>,
    pub git_dirty: Option<bool>,
    pub retry_count: Option<u32>,
    pub error: Option<Option<ErrorTag>>,
    pub phase: Option<String>,
}

impl StateUpdate {
    /// Update that only sets the error tag.
    pub fn error(tag: ErrorTag) -> Self {
        Self {
            error: Some(Some(tag)),
            ..Default::default()
        }
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn with_status(mut self, id: TaskId, status: TaskStatus) -> Self {
        self.status_changes.push((id, status));
        self
    }

    pub fn with_git_dirty(mut self, dirty: bool) -> Self {
        self.git_dirty = Some(dirty);
        self
    }

    pub fn appending(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = Some(TranscriptUpdate::Append(messages));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, phase: &str) -> Task {
        Task::new(id.parse().unwrap(), format!("Task {id}"), phase)
    }

    fn sample() -> OrchestrationState {
        OrchestrationState::new(vec![
            task("P1-T1", "Phase 1: Foundation").with_done(true),
            task("P2-T1", "Phase 2: Features"),
        ])
    }

    #[test]
    fn test_new_state_derives_status_and_phase() {
        let state = sample();
        assert_eq!(state.status_of(&"P1-T1".parse().unwrap()), TaskStatus::Done);
        assert_eq!(state.status_of(&"P2-T1".parse().unwrap()), TaskStatus::Pending);
        assert_eq!(state.phase, "Phase 2: Features");
        assert!(state.current_task.is_none());
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn test_apply_only_touches_set_fields() {
        let mut state = sample();
        state.messages = vec![ChatMessage::user("first")];
        state.retry_count = 2;
        state.error = Some(ErrorTag::ReviewRejected);

        state.apply(StateUpdate::default().appending(vec![ChatMessage::user("second")]));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.error, Some(ErrorTag::ReviewRejected));

        state.apply(
            StateUpdate {
                messages: Some(TranscriptUpdate::Replace(vec![ChatMessage::system("seed")])),
                ..Default::default()
            }
            .clear_error()
            .with_status("P2-T1".parse().unwrap(), TaskStatus::Done)
            .with_git_dirty(true),
        );
        assert_eq!(state.messages, vec![ChatMessage::system("seed")]);
        assert_eq!(state.error, None);
        assert!(state.git_dirty);
        assert_eq!(state.status_of(&"P2-T1".parse().unwrap()), TaskStatus::Done);
    }

    #[test]
    fn test_state_serializes_with_tagged_errors() {
        let mut state = sample();
        state.error = Some(ErrorTag::CommitFailed("hook rejected".into()));
        state
            .token_usage
            .insert("anthropic/m".into(), TokenTally { input: 3, output: 4 });

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["error"]["kind"], "commit_failed");
        assert_eq!(json["error"]["detail"], "hook rejected");
        assert_eq!(json["task_status"]["P1-T1"], "done");

        let back: OrchestrationState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_status_counts() {
        let counts = sample().status_counts();
        assert_eq!(counts[0], (TaskStatus::Done, 1));
        assert_eq!(counts[1], (TaskStatus::Pending, 1));
        assert_eq!(ErrorTag::ReviewRejected.to_string(), "review_rejected");
    }
}
