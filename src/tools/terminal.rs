//! Shell command tool restricted to an allow-list of programs.
//!
//! Commands run through `/bin/sh -c` in the project directory. Only the first
//! word is checked against the allow-list, so `git status && rm -rf x` passes
//! the check; the list limits which tools the model reaches for, it is not a
//! sandbox.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{truncate_chars, Tool};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Sanitize command output to be safe for LLM consumption.
/// Removes binary garbage while preserving valid text.
fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    // More than 10% control bytes: treat as binary.
    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable.]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    let text = String::from_utf8_lossy(bytes);
    text.chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

/// Check the command's first word against the allow-list.
fn validate_command<'a>(command: &'a str, allowed: &[String]) -> Result<&'a str, String> {
    let base = command
        .split_whitespace()
        .next()
        .ok_or_else(|| "Empty command".to_string())?;
    if allowed.iter().any(|a| a == base) {
        Ok(base)
    } else {
        Err(format!(
            "Command '{}' not in allowed list: [{}]",
            base,
            allowed.join(", ")
        ))
    }
}

async fn run_shell_command(command: &str, cwd: &Path, timeout: Duration) -> anyhow::Result<Output> {
    let (shell, flag) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("/bin/sh", "-c")
    };

    let mut cmd = Command::new(shell);
    cmd.arg(flag)
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to execute command: {}", e))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(anyhow::anyhow!("Failed to execute command: {}", e)),
        Err(_) => Err(anyhow::anyhow!(
            "Command timed out after {}s",
            timeout.as_secs()
        )),
    }
}

fn format_output(output: &Output) -> String {
    let stdout = sanitize_output(&output.stdout);
    let stderr = sanitize_output(&output.stderr);

    let mut result = stdout;
    if !stderr.is_empty() {
        result.push_str("\nSTDERR:\n");
        result.push_str(&stderr);
    }
    if !output.status.success() {
        result.push_str(&format!("\nExit code: {}", output.status.code().unwrap_or(-1)));
    }

    if result.is_empty() {
        return "(no output)".to_string();
    }
    match truncate_chars(&result, MAX_OUTPUT_CHARS) {
        (head, Some(_)) => format!("{}\n... [truncated]", head),
        (full, None) => full,
    }
}

/// Run an allow-listed shell command in the project directory.
pub struct RunCommand {
    allowed: Vec<String>,
    timeout: Duration,
}

impl RunCommand {
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed,
            timeout: COMMAND_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project root. Only allow-listed programs may be used as the first word (e.g. git, npm, npx, tsc, eslint)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, working_dir: &Path) -> anyhow::Result<String> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' argument"))?
            .trim();

        let base = validate_command(command, &self.allowed).map_err(|msg| {
            tracing::warn!(command = %command, "Blocked command outside allow-list");
            anyhow::anyhow!(msg)
        })?;

        tracing::info!(program = %base, cwd = %working_dir.display(), "Executing command: {}", command);

        let output = run_shell_command(command, working_dir, self.timeout).await?;

        tracing::debug!(
            exit = output.status.code().unwrap_or(-1),
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "Command completed"
        );

        Ok(format_output(&output))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tool() -> RunCommand {
        RunCommand::new(vec!["echo".into(), "sleep".into(), "ls".into()])
    }

    #[test]
    fn test_validate_command_checks_first_word() {
        let allowed = vec!["git".to_string()];
        assert_eq!(validate_command("git status", &allowed), Ok("git"));
        assert!(validate_command("rm -rf /", &allowed)
            .unwrap_err()
            .starts_with("Command 'rm' not in allowed list"));
        assert_eq!(validate_command("   ", &allowed), Err("Empty command".to_string()));
    }

    #[test]
    fn test_sanitize_output_detects_binary() {
        let binary = vec![0u8; 200];
        assert!(sanitize_output(&binary).starts_with("[Binary output detected"));
        assert_eq!(sanitize_output(b"ok\x07\n"), "ok\n");
    }

    #[tokio::test]
    async fn test_run_command_reports_stderr_and_exit_code() {
        let dir = tempdir().unwrap();
        let out = tool()
            .execute(json!({"command": "echo hi"}), dir.path())
            .await
            .unwrap();
        assert_eq!(out, "hi\n");

        let out = tool()
            .execute(json!({"command": "ls does-not-exist"}), dir.path())
            .await
            .unwrap();
        assert!(out.contains("STDERR:"));
        assert!(out.contains("Exit code:"));
    }

    #[tokio::test]
    async fn test_run_command_rejects_and_times_out() {
        let dir = tempdir().unwrap();
        let err = tool()
            .execute(json!({"command": "curl example.com"}), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not in allowed list"));

        let err = tool()
            .with_timeout(Duration::from_millis(100))
            .execute(json!({"command": "sleep 5"}), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Command timed out"));
    }
}
