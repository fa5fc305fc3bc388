//! Task source: reads the orchestration plan document into task records.
//!
//! Expected layout:
//!
//! ```text
//! ## Phase 1: Foundation
//!
//! ### P1-T1: Expo monorepo scaffolding
//! - **Depends on:** nothing
//! - **Spec:** `docs/specs/ENGINEERING_GUIDE.md`
//! - **Deliverables:**
//!   - `apps/mobile/` - Expo app
//! - **Commit:** `chore: scaffold Expo monorepo`
//! - [x] Done
//! ```

use anyhow::Context;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::task::{Task, TaskId, TaskIdError};

struct Patterns {
    phase: Regex,
    task: Regex,
    depends: Regex,
    task_ref: Regex,
    spec: Regex,
    commit: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        phase: Regex::new(r"^## (Phase \d+: .+)$").expect("valid phase regex"),
        task: Regex::new(r"^### (P\d+-T\d+): (.+)$").expect("valid task regex"),
        depends: Regex::new(r"^- \*\*Depends on:\*\*\s*(.+)$").expect("valid depends regex"),
        task_ref: Regex::new(r"P\d+-T\d+").expect("valid task ref regex"),
        spec: Regex::new(r"^- \*\*Spec:\*\*\s*(.+)$").expect("valid spec regex"),
        commit: Regex::new(r"^- \*\*Commit:\*\*\s*`(.+)`$").expect("valid commit regex"),
    })
}

fn ends_task_body(line: &str) -> bool {
    line.starts_with("### ") || line.starts_with("## ") || line.starts_with("---")
}

/// Field names that never start a deliverable line.
const FIELD_MARKERS: &[&str] = &["Depends", "Spec", "Commit"];

/// A deliverable bullet such as ``- `src/app.ts` - entry point``.
///
/// Only the backticks around the leading path are removed; code spans later
/// in the description are kept.
fn parse_deliverable(body: &str) -> Option<String> {
    let rest = body.strip_prefix("- `")?;
    if FIELD_MARKERS.iter().any(|m| body.contains(m)) {
        return None;
    }
    let deliverable = match rest.find('`') {
        Some(end) => format!("{}{}", &rest[..end], &rest[end + 1..]),
        None => rest.to_string(),
    };
    let deliverable = deliverable.trim().to_string();
    (!deliverable.is_empty()).then_some(deliverable)
}

/// Parse the plan document text into tasks, in document order.
pub fn parse_orchestration(content: &str) -> Result<Vec<Task>, TaskIdError> {
    let p = patterns();
    let lines: Vec<&str> = content.lines().collect();
    let mut tasks = Vec::new();
    let mut current_phase = String::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = p.phase.captures(line) {
            current_phase = caps[1].trim().to_string();
            i += 1;
            continue;
        }

        let Some(caps) = p.task.captures(line) else {
            i += 1;
            continue;
        };

        let mut task = Task::new(TaskId::new(&caps[1])?, caps[2].trim(), current_phase.clone());

        i += 1;
        while i < lines.len() && !ends_task_body(lines[i]) {
            let body = lines[i].trim();

            if let Some(dep) = p.depends.captures(body) {
                task.depends_on = p
                    .task_ref
                    .find_iter(&dep[1])
                    .map(|m| TaskId::new(m.as_str()))
                    .collect::<Result<_, _>>()?;
            } else if let Some(spec) = p.spec.captures(body) {
                task.spec = Some(spec[1].trim().trim_matches('`').trim().to_string());
            } else if let Some(commit) = p.commit.captures(body) {
                task.commit_message = Some(commit[1].to_string());
            } else if body == "- [x] Done" {
                task.done = true;
            } else if body == "- [ ] Done" {
                task.done = false;
            } else if let Some(deliverable) = parse_deliverable(body) {
                task.deliverables.push(deliverable);
            }

            i += 1;
        }

        tasks.push(task);
    }

    Ok(tasks)
}

/// Read and parse a plan document from disk.
pub fn parse_orchestration_file(path: &Path) -> anyhow::Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task document {}", path.display()))?;
    let tasks = parse_orchestration(&content)
        .with_context(|| format!("Failed to parse task document {}", path.display()))?;
    Ok(tasks)
}
