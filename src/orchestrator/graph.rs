//! Nodes of the control loop and the routing between them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::state::{ErrorTag, OrchestrationState};

/// A step of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Planner,
    Implementer,
    Reviewer,
    Committer,
}

impl Node {
    pub const ENTRY: Node = Node::Planner;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
            Self::Committer => "committer",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Self::Planner),
            "implementer" => Ok(Self::Implementer),
            "reviewer" => Ok(Self::Reviewer),
            "committer" => Ok(Self::Committer),
            other => Err(format!("unknown node '{}'", other)),
        }
    }
}

/// After the Planner: stop when nothing was selected.
pub fn route_after_planner(state: &OrchestrationState) -> Option<Node> {
    state.current_task.as_ref().map(|_| Node::Implementer)
}

/// After the Reviewer: commit, retry, or escalate back to the Planner.
pub fn route_after_reviewer(state: &OrchestrationState, max_retries: u32) -> Node {
    if state.error != Some(ErrorTag::ReviewRejected) {
        return Node::Committer;
    }
    if state.retry_count < max_retries {
        Node::Implementer
    } else {
        Node::Planner
    }
}

/// Next node after `node` has run against `state`. `None` is terminal.
pub fn next_node(node: Node, state: &OrchestrationState, max_retries: u32) -> Option<Node> {
    match node {
        Node::Planner => route_after_planner(state),
        Node::Implementer => Some(Node::Reviewer),
        Node::Reviewer => Some(route_after_reviewer(state, max_retries)),
        Node::Committer => Some(Node::Planner),
    }
}
