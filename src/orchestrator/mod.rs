//! The resumable control loop.
//!
//! Runs Planner, Implementer, Reviewer and Committer in the order the routing
//! functions in [`graph`] dictate, applying each role's update to the state
//! and persisting a [`Checkpoint`] after every node. A run can be killed at any
//! point and resumed from the last checkpoint.

pub mod checkpoint;
pub mod graph;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, RunSummary, CHECKPOINT_DB};
pub use graph::{next_node, route_after_planner, route_after_reviewer, Node};
pub use state::{ErrorTag, OrchestrationState, StateUpdate, TranscriptUpdate};

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::agents::{Agent, AgentError, Committer, Implementer, Planner, Reviewer};
use crate::config::Config;
use crate::llm::{ModelRouter, ProviderRegistry};
use crate::task::{pending, Task, TaskId, TaskStatus};

/// Clean-tree Committer passes after which a task is skipped.
pub const MAX_CLEAN_PASSES: u32 = 2;
use crate::tools::{GitWorkingTree, ToolRegistry};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Inference providers exhausted during {node}: {detail}")]
    ProviderExhausted { node: Node, detail: String },

    #[error("Commit failed for task {task}: {detail}")]
    CommitFailed { task: String, detail: String },
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task is done.
    Completed,
    /// No pending tasks remain, but some were given up on.
    Incomplete {
        failed: Vec<TaskId>,
        skipped: Vec<TaskId>,
    },
    /// Pending tasks remain but none can ever be unblocked.
    Blocked { pending: Vec<TaskId> },
}

impl RunOutcome {
    pub fn from_state(state: &OrchestrationState) -> Self {
        if state.error == Some(ErrorTag::Blocked) {
            return RunOutcome::Blocked {
                pending: pending(&state.tasks, &state.task_status)
                    .into_iter()
                    .map(|t| t.id.clone())
                    .collect(),
            };
        }

        let with_status = |status: TaskStatus| -> Vec<TaskId> {
            state
                .tasks
                .iter()
                .filter(|t| state.status_of(&t.id) == status)
                .map(|t| t.id.clone())
                .collect()
        };
        let failed = with_status(TaskStatus::Failed);
        let skipped = with_status(TaskStatus::Skipped);
        if failed.is_empty() && skipped.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::Incomplete { failed, skipped }
        }
    }
}

/// The four role executors.
pub struct Agents {
    pub planner: Arc<dyn Agent>,
    pub implementer: Arc<dyn Agent>,
    pub reviewer: Arc<dyn Agent>,
    pub committer: Arc<dyn Agent>,
}

impl Agents {
    fn for_node(&self, node: Node) -> &Arc<dyn Agent> {
        match node {
            Node::Planner => &self.planner,
            Node::Implementer => &self.implementer,
            Node::Reviewer => &self.reviewer,
            Node::Committer => &self.committer,
        }
    }
}

pub struct Orchestrator {
    agents: Agents,
    router: Arc<ModelRouter>,
    store: Arc<CheckpointStore>,
    run_id: String,
    max_retries: u32,
}

impl Orchestrator {
    pub fn new(
        agents: Agents,
        router: Arc<ModelRouter>,
        store: Arc<CheckpointStore>,
        run_id: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            agents,
            router,
            store,
            run_id: run_id.into(),
            max_retries,
        }
    }

    /// Wire providers, tools, the git working tree and the roles from config.
    pub fn from_config(config: &Config, store: Arc<CheckpointStore>) -> Self {
        let registry = ProviderRegistry::from_env(config.request_timeout);
        if registry.configured().is_empty() {
            tracing::warn!("No provider API keys found; every model call will fail");
        }
        let router = Arc::new(ModelRouter::new(
            registry,
            config.models.clone(),
            config.fallback_chain.clone(),
            config.request_timeout,
            config.fallback_wait,
        ));
        let tools = Arc::new(ToolRegistry::new(
            &config.project_dir,
            config.allowed_commands.clone(),
        ));
        let tree = Arc::new(GitWorkingTree::new(&config.project_dir));

        let agents = Agents {
            planner: Arc::new(Planner::new(router.clone(), &config.project_dir)),
            implementer: Arc::new(Implementer::new(
                router.clone(),
                tools.clone(),
                config.implementer_max_rounds,
            )),
            reviewer: Arc::new(Reviewer::new(
                router.clone(),
                tools,
                config.reviewer_max_rounds,
            )),
            committer: Arc::new(Committer::new(router.clone(), tree)),
        };

        Self::new(
            agents,
            router,
            store,
            config.run_id.clone(),
            config.max_review_retries,
        )
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Start a fresh run over `tasks`, replacing any previous checkpoint.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunOutcome, OrchestratorError> {
        let checkpoint = Checkpoint {
            run_id: self.run_id.clone(),
            step: 0,
            next: Some(Node::ENTRY),
            state: OrchestrationState::new(tasks),
            updated_at: Utc::now(),
        };
        self.store.save(&checkpoint)?;
        tracing::info!(run_id = %self.run_id, tasks = checkpoint.state.tasks.len(), "Starting run");
        self.drive(checkpoint).await
    }

    /// Continue from a stored checkpoint.
    pub async fn resume(&self, checkpoint: Checkpoint) -> Result<RunOutcome, OrchestratorError> {
        tracing::info!(
            run_id = %checkpoint.run_id,
            step = checkpoint.step,
            next = ?checkpoint.next.map(|n| n.as_str()),
            "Resuming run"
        );
        self.drive(checkpoint).await
    }

    async fn drive(&self, mut checkpoint: Checkpoint) -> Result<RunOutcome, OrchestratorError> {
        self.router
            .restore(&checkpoint.state.current_llm, &checkpoint.state.token_usage);

        while let Some(node) = checkpoint.next {
            let task_id = checkpoint
                .state
                .current_task
                .as_ref()
                .map(|t| t.id.to_string())
                .unwrap_or_default();
            tracing::info!(step = checkpoint.step + 1, node = %node, task_id = %task_id, "Running node");

            let update = match self.agents.for_node(node).run(&checkpoint.state).await {
                Ok(update) => update,
                Err(AgentError::Router(e)) => {
                    let detail = e.to_string();
                    // Record the failure but keep `next`, so resume retries this node.
                    checkpoint.state.error = Some(ErrorTag::ProviderExhausted(detail.clone()));
                    self.sync_router(&mut checkpoint.state);
                    checkpoint.updated_at = Utc::now();
                    self.store.save(&checkpoint)?;
                    return Err(OrchestratorError::ProviderExhausted { node, detail });
                }
            };

            checkpoint.state.apply(update);
            self.sync_router(&mut checkpoint.state);
            if node == Node::Committer {
                self.track_clean_pass(&mut checkpoint.state);
            }

            let next = next_node(node, &checkpoint.state, self.max_retries);
            if node == Node::Reviewer && next == Some(Node::Planner) {
                self.escalate(&mut checkpoint.state);
            }

            checkpoint.step += 1;
            checkpoint.next = next;
            checkpoint.updated_at = Utc::now();
            self.store.save(&checkpoint)?;

            if node == Node::Committer {
                if let Some(ErrorTag::CommitFailed(detail)) = &checkpoint.state.error {
                    return Err(OrchestratorError::CommitFailed {
                        task: task_id,
                        detail: detail.clone(),
                    });
                }
            }
        }

        let outcome = RunOutcome::from_state(&checkpoint.state);
        match &outcome {
            RunOutcome::Completed => {
                tracing::info!(run_id = %self.run_id, steps = checkpoint.step, "Run completed")
            }
            RunOutcome::Incomplete { failed, skipped } => tracing::warn!(
                run_id = %self.run_id,
                failed = failed.len(),
                skipped = skipped.len(),
                "Run ended with unfinished tasks"
            ),
            RunOutcome::Blocked { pending } => {
                tracing::warn!(run_id = %self.run_id, pending = pending.len(), "Run ended blocked")
            }
        }
        Ok(outcome)
    }

    /// Give up on the current task after too many rejections.
    fn escalate(&self, state: &mut OrchestrationState) {
        if let Some(task) = &state.current_task {
            tracing::warn!(
                task_id = %task.id,
                retry_count = state.retry_count,
                "Review retries exhausted, marking task failed"
            );
            state.task_status.insert(task.id.clone(), TaskStatus::Failed);
        }
    }

    /// Skip a task whose approved work keeps leaving nothing to commit.
    fn track_clean_pass(&self, state: &mut OrchestrationState) {
        let Some(id) = state.current_task.as_ref().map(|t| t.id.clone()) else {
            return;
        };
        match state.status_of(&id) {
            TaskStatus::Done => {
                state.clean_passes.remove(&id);
            }
            TaskStatus::Pending if state.error.is_none() => {
                let passes = state.clean_passes.entry(id.clone()).or_insert(0);
                *passes += 1;
                if *passes >= MAX_CLEAN_PASSES {
                    tracing::warn!(
                        task_id = %id,
                        passes = *passes,
                        "Nothing to commit after repeated passes, skipping task"
                    );
                    state.task_status.insert(id, TaskStatus::Skipped);
                }
            }
            _ => {}
        }
    }

    fn sync_router(&self, state: &mut OrchestrationState) {
        let (current, usage) = self.router.snapshot();
        state.current_llm = current;
        state.token_usage = usage;
    }
}
