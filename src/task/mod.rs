//! Task module - task records, the task document source, and scheduling.
//!
//! Tasks are loaded once from the plan document and never change afterwards;
//! progress lives in a separate status map owned by the orchestration state.
//! Missing dependencies and cycles come back from [`TaskGraph::new`] as
//! [`GraphIssue`] values, and the scheduler only reads tasks and statuses.

pub mod scheduler;
pub mod source;
pub mod task;

pub use scheduler::{next_phase, pending, unblocked};
pub use source::{parse_orchestration, parse_orchestration_file};
pub use task::{
    initial_status, GraphIssue, StatusMap, Task, TaskGraph, TaskGraphError, TaskId, TaskIdError,
    TaskStatus,
};
