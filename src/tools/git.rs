//! Git operations on the project working tree.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// The version-controlled working tree the Committer acts on.
#[async_trait]
pub trait WorkingTree: Send + Sync {
    /// `git status --porcelain` output; empty when clean.
    async fn status_porcelain(&self) -> Result<String>;

    /// `git diff --stat` output.
    async fn diff_stat(&self) -> Result<String>;

    /// Stage every change and commit it with `message`.
    async fn commit_all(&self, message: &str) -> Result<()>;
}

/// Working tree backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitWorkingTree {
    path: PathBuf,
}

impl GitWorkingTree {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .current_dir(&self.path)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    async fn git_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl WorkingTree for GitWorkingTree {
    async fn status_porcelain(&self) -> Result<String> {
        self.git_stdout(&["status", "--porcelain"]).await
    }

    async fn diff_stat(&self) -> Result<String> {
        self.git_stdout(&["diff", "--stat"]).await
    }

    async fn commit_all(&self, message: &str) -> Result<()> {
        tracing::info!(path = %self.path.display(), message = %message, "Committing changes");

        self.git_stdout(&["add", "-A"]).await?;

        let output = self.git(&["commit", "-m", message]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            anyhow::bail!("git commit failed: {}", detail);
        }

        Ok(())
    }
}
