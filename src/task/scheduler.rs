//! Task Scheduler - dependency-based runnable-set computation.
//!
//! Everything here is a pure function of the task list and the status map.
//! Choosing among several runnable tasks is the planner's job, not ours.

use super::task::{StatusMap, Task, TaskStatus};

fn status_of(task: &Task, status: &StatusMap) -> TaskStatus {
    status.get(&task.id).copied().unwrap_or(TaskStatus::Pending)
}

/// Tasks that are pending and whose every dependency is `done`.
///
/// Dependencies missing from `status` count as not done. The result keeps the
/// input order.
pub fn unblocked<'a>(tasks: &'a [Task], status: &StatusMap) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|task| status_of(task, status) == TaskStatus::Pending)
        .filter(|task| {
            task.depends_on
                .iter()
                .all(|dep| status.get(dep) == Some(&TaskStatus::Done))
        })
        .collect()
}

/// Tasks still pending, in input order.
pub fn pending<'a>(tasks: &'a [Task], status: &StatusMap) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|task| status_of(task, status) == TaskStatus::Pending)
        .collect()
}

/// Phase of the first pending task, if any.
pub fn next_phase<'a>(tasks: &'a [Task], status: &StatusMap) -> Option<&'a str> {
    pending(tasks, status)
        .first()
        .map(|task| task.phase.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{initial_status, TaskId};

    fn id(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    /// P1-T1 done, P1-T2 -> P1-T1, P1-T3 -> P1-T2, P2-T1 -> two absent tasks.
    fn scenario_a() -> Vec<Task> {
        vec![
            Task::new(id("P1-T1"), "Scaffolding", "Phase 1: Foundation").with_done(true),
            Task::new(id("P1-T2"), "Design tokens", "Phase 1: Foundation")
                .with_dependencies([id("P1-T1")]),
            Task::new(id("P1-T3"), "Core UI", "Phase 1: Foundation")
                .with_dependencies([id("P1-T2")]),
            Task::new(id("P2-T1"), "Report submission", "Phase 2: Core Reporting")
                .with_dependencies([id("P1-T7"), id("P1-T6")]),
        ]
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.to_string()).collect()
    }

    #[test]
    fn test_scenario_a_initial_unblocked() {
        let tasks = scenario_a();
        let status = initial_status(&tasks);

        assert_eq!(status[&id("P1-T1")], TaskStatus::Done);
        assert_eq!(status[&id("P1-T2")], TaskStatus::Pending);
        assert_eq!(status[&id("P1-T3")], TaskStatus::Pending);
        assert_eq!(status[&id("P2-T1")], TaskStatus::Pending);

        assert_eq!(ids(&unblocked(&tasks, &status)), vec!["P1-T2"]);
    }

    #[test]
    fn test_scenario_a_absent_dependencies_never_unblock() {
        let tasks = scenario_a();
        let mut status = initial_status(&tasks);
        status.insert(id("P1-T2"), TaskStatus::Done);
        status.insert(id("P1-T3"), TaskStatus::Done);

        assert!(unblocked(&tasks, &status).is_empty());
        assert_eq!(ids(&pending(&tasks, &status)), vec!["P2-T1"]);
    }

    #[test]
    fn test_unblocked_is_stable_and_idempotent() {
        let tasks = vec![
            Task::new(id("P1-T3"), "c", "Phase 1"),
            Task::new(id("P1-T1"), "a", "Phase 1"),
            Task::new(id("P1-T2"), "b", "Phase 1"),
        ];
        let status = initial_status(&tasks);

        let first = ids(&unblocked(&tasks, &status));
        let second = ids(&unblocked(&tasks, &status));
        assert_eq!(first, vec!["P1-T3", "P1-T1", "P1-T2"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_pending_tasks_excluded() {
        let tasks = vec![
            Task::new(id("P1-T1"), "a", "Phase 1"),
            Task::new(id("P1-T2"), "b", "Phase 1"),
            Task::new(id("P1-T3"), "c", "Phase 1").with_dependencies([id("P1-T2")]),
        ];
        let mut status = initial_status(&tasks);
        status.insert(id("P1-T1"), TaskStatus::Failed);
        status.insert(id("P1-T2"), TaskStatus::Skipped);

        // A skipped dependency is not done, so P1-T3 stays blocked.
        assert!(unblocked(&tasks, &status).is_empty());
    }

    #[test]
    fn test_task_missing_from_status_counts_as_pending() {
        let tasks = vec![Task::new(id("P1-T1"), "a", "Phase 1")];
        let status = StatusMap::new();
        assert_eq!(ids(&unblocked(&tasks, &status)), vec!["P1-T1"]);
    }

    #[test]
    fn test_next_phase_is_earliest_pending() {
        let tasks = scenario_a();
        let status = initial_status(&tasks);
        assert_eq!(next_phase(&tasks, &status), Some("Phase 1: Foundation"));

        let all_done: StatusMap = tasks
            .iter()
            .map(|t| (t.id.clone(), TaskStatus::Done))
            .collect();
        assert_eq!(next_phase(&tasks, &all_done), None);
    }
}
