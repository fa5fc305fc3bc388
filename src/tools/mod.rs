//! Tool execution environment for the Implementer and Reviewer.
//!
//! The tool set is closed and built once at startup. Every tool receives its
//! arguments as JSON and the project directory, and returns text. Dispatch
//! never fails: unknown tools, malformed arguments and tool errors all come
//! back as `Error: ...` strings so the model can see and react to them.

mod file_ops;
pub mod git;
mod search;
mod terminal;

pub use file_ops::{EditFile, ListDirectory, ReadFile, WriteFile};
pub use git::{GitWorkingTree, WorkingTree};
pub use search::SearchFiles;
pub use terminal::RunCommand;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{FunctionDefinition, ToolCall, ToolDefinition};

/// Commands `run_command` accepts when no list is configured.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] =
    &["git", "npm", "npx", "tsc", "eslint", "prettier", "node", "python"];

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// Resolve a path: absolute paths are used as-is, relative ones join `working_dir`.
pub(crate) fn resolve_path(path_str: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(path_str);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

/// Cut `text` to at most `max_chars` characters. Returns the total char count
/// when truncation happened.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> (String, Option<usize>) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), Some(text.chars().count())),
        None => (text.to_string(), None),
    }
}

/// The closed set of tools, bound to the project directory.
#[derive(Clone)]
pub struct ToolRegistry {
    working_dir: PathBuf,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Standard tool set for a project.
    pub fn new(working_dir: impl Into<PathBuf>, allowed_commands: Vec<String>) -> Self {
        let mut registry = Self {
            working_dir: working_dir.into(),
            tools: HashMap::new(),
        };
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(WriteFile));
        registry.register(Arc::new(EditFile));
        registry.register(Arc::new(ListDirectory));
        registry.register(Arc::new(SearchFiles::default()));
        registry.register(Arc::new(RunCommand::new(allowed_commands)));
        registry
    }

    fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Schemas for every tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    fn resolve(&self, call: &ToolCall) -> Result<(Arc<dyn Tool>, Value), ToolError> {
        let name = call.function.name.as_str();
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let raw = call.function.arguments.trim();
        let args = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: e.to_string(),
            })?
        };
        if !args.is_object() {
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: "arguments must be a JSON object".to_string(),
            });
        }
        Ok((tool, args))
    }

    /// Run a requested tool call and return its textual result.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        let (tool, args) = match self.resolve(call) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(tool = %call.function.name, error = %e, "Rejected tool call");
                return format!("Error: {}", e);
            }
        };

        match tool.execute(args, &self.working_dir).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(tool = %call.function.name, error = %e, "Tool failed");
                format!("Error executing {}: {}", call.function.name, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> ToolRegistry {
        ToolRegistry::new(dir, vec!["echo".to_string()])
    }

    #[test]
    fn test_registry_exposes_closed_tool_set() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        assert_eq!(
            registry.names(),
            vec![
                "edit_file",
                "list_directory",
                "read_file",
                "run_command",
                "search_files",
                "write_file"
            ]
        );
        let defs = registry.definitions();
        assert_eq!(defs.len(), 6);
        assert_eq!(defs[0].function.name, "edit_file");
        assert_eq!(defs[0].function.parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_is_text() {
        let dir = tempdir().unwrap();
        let out = registry(dir.path())
            .dispatch(&ToolCall::new("c1", "delete_everything", "{}"))
            .await;
        assert_eq!(out, "Error: Unknown tool 'delete_everything'");
    }

    #[tokio::test]
    async fn test_dispatch_invalid_arguments_is_text() {
        let dir = tempdir().unwrap();
        let out = registry(dir.path())
            .dispatch(&ToolCall::new("c1", "read_file", "{not json"))
            .await;
        assert!(out.starts_with("Error: Invalid arguments for read_file"));
    }

    #[tokio::test]
    async fn test_dispatch_tool_failure_is_text() {
        let dir = tempdir().unwrap();
        let out = registry(dir.path())
            .dispatch(&ToolCall::new("c1", "read_file", r#"{"path":"missing.txt"}"#))
            .await;
        assert!(out.starts_with("Error executing read_file:"), "{out}");
    }

    #[tokio::test]
    async fn test_dispatch_write_then_read() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        let out = registry
            .dispatch(&ToolCall::new(
                "c1",
                "write_file",
                r#"{"path":"src/a.txt","content":"hello"}"#,
            ))
            .await;
        assert!(out.starts_with("Successfully wrote 5 chars"));
        let out = registry
            .dispatch(&ToolCall::new("c2", "read_file", r#"{"path":"src/a.txt"}"#))
            .await;
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), Some(5)));
        assert_eq!(truncate_chars("abc", 3), ("abc".to_string(), None));
        assert_eq!(resolve_path("/etc/hosts", Path::new("/p")), PathBuf::from("/etc/hosts"));
        assert_eq!(resolve_path("a/b", Path::new("/p")), PathBuf::from("/p/a/b"));
    }
}
