//! File tools: read, write, edit, list.
//!
//! Paths can be absolute or relative to the project directory.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{resolve_path, truncate_chars, Tool};

const MAX_READ_CHARS: usize = 50_000;
const MAX_LIST_ENTRIES: usize = 200;

fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", key))
}

/// Read the contents of a file.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use absolute paths or paths relative to the project root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the project root."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String> {
        let path = required_str(&args, "path")?;
        let full_path = resolve_path(path, working_dir);

        if !full_path.exists() {
            anyhow::bail!("File not found: {}", full_path.display());
        }
        if !full_path.is_file() {
            anyhow::bail!("Not a file: {}", full_path.display());
        }

        let content = tokio::fs::read_to_string(&full_path).await?;
        match truncate_chars(&content, MAX_READ_CHARS) {
            (head, Some(total)) => Ok(format!("{}\n\n... [truncated, {} total chars]", head, total)),
            (content, None) => Ok(content),
        }
    }
}

/// Write content to a file (create or overwrite).
pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, or overwrites if it does. Creates parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the project root."
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let full_path = resolve_path(path, working_dir);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, content).await?;

        Ok(format!(
            "Successfully wrote {} chars to {}",
            content.chars().count(),
            full_path.display()
        ))
    }
}

/// Replace one exact occurrence of a string in a file.
pub struct EditFile;

#[async_trait]
impl Tool for EditFile {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. The old_string must appear exactly once."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the project root."
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace. Must occur exactly once."
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String> {
        let path = required_str(&args, "path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let full_path = resolve_path(path, working_dir);

        if !full_path.exists() {
            anyhow::bail!("File not found: {}", full_path.display());
        }
        if old_string.is_empty() {
            anyhow::bail!("old_string must not be empty");
        }

        let content = tokio::fs::read_to_string(&full_path).await?;
        match content.matches(old_string).count() {
            0 => anyhow::bail!("old_string not found in {}", full_path.display()),
            1 => {}
            n => anyhow::bail!(
                "old_string found {} times in {}. Must be unique.",
                n,
                full_path.display()
            ),
        }

        let updated = content.replacen(old_string, new_string, 1);
        tokio::fs::write(&full_path, updated).await?;

        Ok(format!("Successfully edited {}", full_path.display()))
    }
}

/// List entries of a directory.
pub struct ListDirectory;

#[async_trait]
impl Tool for ListDirectory {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories at a path. Directories are prefixed with 'd ', files with 'f '."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: project root)."
                }
            }
        })
    }

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String> {
        let path = args["path"].as_str().unwrap_or(".");
        let full_path = resolve_path(path, working_dir);

        if !full_path.exists() {
            anyhow::bail!("Directory not found: {}", full_path.display());
        }
        if !full_path.is_dir() {
            anyhow::bail!("Not a directory: {}", full_path.display());
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&full_path).await?;
        while let Some(entry) = reader.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push((entry.file_name().to_string_lossy().to_string(), is_dir));
        }
        entries.sort();

        let mut lines: Vec<String> = entries
            .iter()
            .take(MAX_LIST_ENTRIES)
            .map(|(name, is_dir)| format!("{}{}", if *is_dir { "d " } else { "f " }, name))
            .collect();
        if entries.len() > MAX_LIST_ENTRIES {
            lines.push(format!(
                "... and {} more entries",
                entries.len() - MAX_LIST_ENTRIES
            ));
        }

        Ok(lines.join("\n"))
    }
}
