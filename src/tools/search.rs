//! Regex search across project files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{resolve_path, truncate_chars, Tool};

const MAX_OUTPUT_CHARS: usize = 20_000;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Directories never worth searching.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Search file contents for a regex.
pub struct SearchFiles {
    timeout: Duration,
}

impl Default for SearchFiles {
    fn default() -> Self {
        Self {
            timeout: SEARCH_TIMEOUT,
        }
    }
}

/// Compile a shell-style file glob (`*.ts`, `[ab].py`, `*.{ts,tsx}`).
fn file_matcher(glob: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(glob)
        .literal_separator(false)
        .build()?
        .compile_matcher())
}

/// Walk `root` collecting matches. Stops early once `cancel` is set.
fn search_blocking(
    root: PathBuf,
    working_dir: PathBuf,
    pattern: Regex,
    glob: Option<GlobMatcher>,
    cancel: Arc<AtomicBool>,
) -> String {
    let mut output = String::new();

    let walker = WalkDir::new(&root).follow_links(false).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.depth() > 0
            && e.file_name().to_str().map_or(false, |n| SKIP_DIRS.contains(&n)))
    });

    for entry in walker.filter_map(|e| e.ok()) {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(glob) = &glob {
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            if !glob.is_match(relative) && !glob.is_match(entry.file_name()) {
                continue;
            }
        }
        // Binary or unreadable files are skipped.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let display = entry
            .path()
            .strip_prefix(&working_dir)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        for (idx, line) in content.lines().enumerate() {
            if pattern.is_match(line) {
                output.push_str(&format!("{}:{}:{}\n", display, idx + 1, line));
            }
        }
        if output.len() > MAX_OUTPUT_CHARS * 4 {
            break;
        }
    }

    output
}

#[async_trait]
impl Tool for SearchFiles {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern in files. Returns matching lines as path:line:text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: project root)"
                },
                "file_glob": {
                    "type": "string",
                    "description": "Only search files whose name matches this glob, e.g. '*.ts'"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'pattern' argument"))?;
        let pattern =
            Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid regex pattern: {}", e))?;
        let glob = match args["file_glob"].as_str().filter(|g| !g.trim().is_empty()) {
            Some(g) => Some(
                file_matcher(g.trim()).map_err(|e| anyhow::anyhow!("Invalid file_glob: {}", e))?,
            ),
            None => None,
        };

        let root = resolve_path(args["path"].as_str().unwrap_or("."), working_dir);
        if !root.exists() {
            anyhow::bail!("Path not found: {}", root.display());
        }

        let working_dir = working_dir.to_path_buf();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            search_blocking(root, working_dir, pattern, glob, flag)
        });
        let output = match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                anyhow::bail!("Search timed out after {}s", self.timeout.as_secs())
            }
        };

        if output.is_empty() {
            return Ok("No matches found.".to_string());
        }
        match truncate_chars(&output, MAX_OUTPUT_CHARS) {
            (head, Some(_)) => Ok(format!("{}\n... [truncated]", head)),
            (full, None) => Ok(full),
        }
    }
}
