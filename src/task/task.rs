//! Task records, statuses, and the load-time task graph.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^P\d+-T\d+$").expect("valid task id regex"))
}

/// Error returned when a string is not a valid task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task id '{0}': expected P<phase>-T<n>")]
pub struct TaskIdError(pub String);

/// Task identifier in the form `P<phase>-T<n>` (e.g. `P1-T3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self, TaskIdError> {
        let id = id.into();
        if task_id_pattern().is_match(&id) {
            Ok(Self(id))
        } else {
            Err(TaskIdError(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = TaskIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
    Blocked,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }

    /// Single-character marker used in status listings.
    pub fn icon(&self) -> char {
        match self {
            Self::Done => 'v',
            Self::Pending => 'o',
            Self::Failed => 'x',
            Self::Skipped => '-',
            Self::Blocked => 'b',
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of every task in a run, keyed by task id.
pub type StatusMap = BTreeMap<TaskId, TaskStatus>;

/// A unit of work read from the task document. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub phase: String,
    /// Dependencies in document order. May name tasks absent from the graph.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Specification artifact, relative to the project directory.
    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    /// Commit message to use verbatim instead of asking a model.
    #[serde(default)]
    pub commit_message: Option<String>,
    /// Completion flag declared by the task document.
    #[serde(default)]
    pub done: bool,
}

impl Task {
    pub fn new(id: TaskId, title: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            phase: phase.into(),
            depends_on: Vec::new(),
            spec: None,
            deliverables: Vec::new(),
            commit_message: None,
            done: false,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }
}

/// Build the starting status map from each task's declared completion flag.
pub fn initial_status(tasks: &[Task]) -> StatusMap {
    tasks
        .iter()
        .map(|t| {
            let status = if t.done {
                TaskStatus::Done
            } else {
                TaskStatus::Pending
            };
            (t.id.clone(), status)
        })
        .collect()
}

/// Hard errors that make a task list unusable.
#[derive(Debug, Error)]
pub enum TaskGraphError {
    #[error("duplicate task id {0}")]
    DuplicateId(TaskId),

    #[error("task graph has integrity problems: {0:?}")]
    Integrity(Vec<GraphIssue>),
}

/// Problems that leave some tasks permanently unrunnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    /// A dependency names a task that is not in the graph.
    MissingDependency { task: TaskId, dependency: TaskId },
    /// Tasks that depend on each other in a loop.
    Cycle { tasks: Vec<TaskId> },
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency { task, dependency } => {
                write!(f, "{} depends on unknown task {}", task, dependency)
            }
            Self::Cycle { tasks } => {
                let ids: Vec<&str> = tasks.iter().map(TaskId::as_str).collect();
                write!(f, "dependency cycle: {}", ids.join(" -> "))
            }
        }
    }
}

/// Ordered, validated task list.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    issues: Vec<GraphIssue>,
}

impl TaskGraph {
    /// Validate a task list. Duplicate ids are rejected; dangling dependencies
    /// and cycles are recorded as issues, or rejected when `strict` is set.
    pub fn new(tasks: Vec<Task>, strict: bool) -> Result<Self, TaskGraphError> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.clone()) {
                return Err(TaskGraphError::DuplicateId(task.id.clone()));
            }
        }

        let mut issues = Vec::new();
        for task in &tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep) {
                    issues.push(GraphIssue::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        issues.extend(find_cycles(&tasks));

        if strict && !issues.is_empty() {
            return Err(TaskGraphError::Integrity(issues));
        }

        Ok(Self { tasks, issues })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub fn issues(&self) -> &[GraphIssue] {
        &self.issues
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Depth-first search over known dependency edges, reporting each cycle once.
fn find_cycles(tasks: &[Task]) -> Vec<GraphIssue> {
    let index: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
    let mut marks: HashMap<&TaskId, Mark> = HashMap::new();
    let mut issues = Vec::new();

    fn visit<'a>(
        id: &'a TaskId,
        index: &HashMap<&'a TaskId, &'a Task>,
        marks: &mut HashMap<&'a TaskId, Mark>,
        path: &mut Vec<&'a TaskId>,
        issues: &mut Vec<GraphIssue>,
    ) {
        match marks.get(id) {
            Some(Mark::Visited) => return,
            Some(Mark::Visiting) => {
                if let Some(start) = path.iter().position(|p| *p == id) {
                    let mut cycle: Vec<TaskId> = path[start..].iter().map(|p| (*p).clone()).collect();
                    cycle.push(id.clone());
                    issues.push(GraphIssue::Cycle { tasks: cycle });
                }
                return;
            }
            None => {}
        }

        marks.insert(id, Mark::Visiting);
        path.push(id);
        if let Some(task) = index.get(id) {
            for dep in &task.depends_on {
                if let Some((dep_id, _)) = index.get_key_value(dep) {
                    visit(*dep_id, index, marks, path, issues);
                }
            }
        }
        path.pop();
        marks.insert(id, Mark::Visited);
    }

    for task in tasks {
        let mut path = Vec::new();
        visit(&task.id, &index, &mut marks, &mut path, &mut issues);
    }

    issues
}
