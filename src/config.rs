//! Configuration management.
//!
//! Configuration comes from a YAML file plus environment variables:
//!
//! - `TASKLOOP_CONFIG` - Optional. Path to the YAML file (default: `./config.yaml` if present)
//! - `TASKLOOP_PROJECT_DIR` - Optional. Overrides `project_dir` from the file
//! - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GOOGLE_API_KEY`, `OPENROUTER_API_KEY` -
//!   provider keys, read when the provider registry is built
//!
//! A `.env` file in the current directory is loaded first.
//!
//! ```yaml
//! project_dir: ../my-app
//! orchestration_file: docs/plans/ORCHESTRATION.md
//! models:
//!   planner: anthropic/claude-haiku-4-5
//!   implementer: anthropic/claude-sonnet-4-5
//! fallback_chain:
//!   - { provider: openai, model: gpt-4o }
//! retry:
//!   max_review_retries: 3
//! tools:
//!   allowed_commands: [git, npm, npx]
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::agents::{IMPLEMENTER_MAX_ROUNDS, REVIEWER_MAX_ROUNDS};
use crate::llm::{AgentRole, ModelSpec};
use crate::tools::DEFAULT_ALLOWED_COMMANDS;

pub const CONFIG_ENV: &str = "TASKLOOP_CONFIG";
pub const PROJECT_DIR_ENV: &str = "TASKLOOP_PROJECT_DIR";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const DEFAULT_ORCHESTRATION_FILE: &str = "docs/plans/ORCHESTRATION.md";
const DEFAULT_LOG_DIR: &str = ".agent-logs";
const DEFAULT_RUN_ID: &str = "main";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid model for {role}: {reason}")]
    InvalidModel { role: AgentRole, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    project_dir: Option<String>,
    orchestration_file: Option<String>,
    checkpoint_dir: Option<String>,
    log_dir: Option<String>,
    run_id: Option<String>,
    strict_graph: bool,
    models: HashMap<AgentRole, String>,
    fallback_chain: Vec<ModelSpec>,
    retry: RawRetry,
    agents: RawAgents,
    tools: RawTools,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRetry {
    max_review_retries: u32,
    fallback_wait_seconds: u64,
    request_timeout_seconds: u64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_review_retries: 3,
            fallback_wait_seconds: 60,
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawAgents {
    implementer_max_rounds: usize,
    reviewer_max_rounds: usize,
}

impl Default for RawAgents {
    fn default() -> Self {
        Self {
            implementer_max_rounds: IMPLEMENTER_MAX_ROUNDS,
            reviewer_max_rounds: REVIEWER_MAX_ROUNDS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTools {
    allowed_commands: Option<Vec<String>>,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project working tree the roles act on (absolute).
    pub project_dir: PathBuf,
    /// Task document (absolute).
    pub orchestration_file: PathBuf,
    /// Directory holding `checkpoints.db`.
    pub checkpoint_dir: PathBuf,
    /// Directory for JSON-lines run logs (absolute).
    pub log_dir: PathBuf,
    /// Checkpoint key for this project.
    pub run_id: String,
    /// Treat dangling dependencies and cycles as load errors.
    pub strict_graph: bool,
    pub models: HashMap<AgentRole, ModelSpec>,
    pub fallback_chain: Vec<ModelSpec>,
    pub max_review_retries: u32,
    pub fallback_wait: Duration,
    pub request_timeout: Duration,
    pub implementer_max_rounds: usize,
    pub reviewer_max_rounds: usize,
    pub allowed_commands: Vec<String>,
}

impl Config {
    /// Load configuration from `path`, `TASKLOOP_CONFIG`, or `./config.yaml`.
    ///
    /// Without any file, defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let (raw, base_dir) = match explicit {
            Some(path) => (read_raw(&path)?, parent_dir(&path)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                (read_raw(&path)?, parent_dir(&path))
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                (RawConfig::default(), PathBuf::from("."))
            }
        };

        let env_project_dir = std::env::var(PROJECT_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty());

        Self::resolve(raw, &base_dir, env_project_dir.as_deref())
    }

    /// Parse YAML text. Relative paths resolve against `base_dir`.
    pub fn from_yaml(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: base_dir.join(DEFAULT_CONFIG_FILE),
            source,
        })?;
        Self::resolve(raw, base_dir, None)
    }

    fn resolve(
        raw: RawConfig,
        base_dir: &Path,
        env_project_dir: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let project_dir = match env_project_dir {
            Some(dir) => absolute(Path::new(&expand_home(dir))),
            None => absolute(&base_dir.join(expand_home(raw.project_dir.as_deref().unwrap_or(".")))),
        };

        let orchestration_file = project_dir.join(
            raw.orchestration_file
                .as_deref()
                .unwrap_or(DEFAULT_ORCHESTRATION_FILE),
        );
        let log_dir = project_dir.join(raw.log_dir.as_deref().unwrap_or(DEFAULT_LOG_DIR));
        let checkpoint_dir = match raw.checkpoint_dir.as_deref() {
            Some(dir) => absolute(&base_dir.join(expand_home(dir))),
            None => default_checkpoint_dir(&project_dir),
        };

        let mut models = HashMap::new();
        for (role, spec) in raw.models {
            let parsed = spec
                .parse::<ModelSpec>()
                .map_err(|reason| ConfigError::InvalidModel { role, reason })?;
            models.insert(role, parsed);
        }

        let run_id = raw
            .run_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RUN_ID.to_string());

        if raw.retry.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.request_timeout_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        if raw.agents.implementer_max_rounds == 0 || raw.agents.reviewer_max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agents",
                reason: "round limits must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            project_dir,
            orchestration_file,
            checkpoint_dir,
            log_dir,
            run_id,
            strict_graph: raw.strict_graph,
            models,
            fallback_chain: raw.fallback_chain,
            max_review_retries: raw.retry.max_review_retries,
            fallback_wait: Duration::from_secs(raw.retry.fallback_wait_seconds),
            request_timeout: Duration::from_secs(raw.retry.request_timeout_seconds),
            implementer_max_rounds: raw.agents.implementer_max_rounds,
            reviewer_max_rounds: raw.agents.reviewer_max_rounds,
            allowed_commands: raw.tools.allowed_commands.unwrap_or_else(|| {
                DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect()
            }),
        })
    }
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// `~/.taskloop/<project name>`.
fn default_checkpoint_dir(project_dir: &Path) -> PathBuf {
    let name = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "default".to_string());
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taskloop")
        .join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderKind;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file_contents() {
        let dir = tempdir().unwrap();
        let config = Config::from_yaml("{}", dir.path()).unwrap();

        assert_eq!(config.project_dir, dir.path().canonicalize().unwrap());
        assert_eq!(
            config.orchestration_file,
            config.project_dir.join("docs/plans/ORCHESTRATION.md")
        );
        assert_eq!(config.log_dir, config.project_dir.join(".agent-logs"));
        assert!(config.checkpoint_dir.ends_with(
            Path::new(".taskloop").join(config.project_dir.file_name().unwrap())
        ));
        assert_eq!(config.run_id, "main");
        assert_eq!(config.max_review_retries, 3);
        assert_eq!(config.fallback_wait, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.implementer_max_rounds, 30);
        assert_eq!(config.reviewer_max_rounds, 15);
        assert!(config.allowed_commands.contains(&"git".to_string()));
        assert!(!config.strict_graph);
    }

    #[test]
    fn test_full_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        let yaml = r#"
project_dir: app
orchestration_file: PLAN.md
checkpoint_dir: state
strict_graph: true
models:
  planner: anthropic/claude-haiku-4-5
  implementer: openrouter/qwen/qwen3-coder
fallback_chain:
  - provider: openai
    model: gpt-4o
  - provider: google
    model: gemini-2.0-flash
retry:
  max_review_retries: 2
  fallback_wait_seconds: 5
tools:
  allowed_commands: [git, cargo]
"#;
        let config = Config::from_yaml(yaml, dir.path()).unwrap();
        let project = dir.path().join("app").canonicalize().unwrap();

        assert_eq!(config.project_dir, project);
        assert_eq!(config.orchestration_file, project.join("PLAN.md"));
        assert!(config.checkpoint_dir.ends_with("state"));
        assert!(config.strict_graph);
        assert_eq!(
            config.models[&AgentRole::Implementer],
            ModelSpec::new(ProviderKind::OpenRouter, "qwen/qwen3-coder")
        );
        assert_eq!(config.fallback_chain.len(), 2);
        assert_eq!(config.fallback_chain[1].provider, ProviderKind::Google);
        assert_eq!(config.max_review_retries, 2);
        assert_eq!(config.fallback_wait, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.allowed_commands, vec!["git", "cargo"]);
    }

    #[test]
    fn test_env_project_dir_wins() {
        let dir = tempdir().unwrap();
        let raw: RawConfig = serde_yaml::from_str("project_dir: elsewhere").unwrap();
        let config =
            Config::resolve(raw, Path::new("."), Some(dir.path().to_str().unwrap())).unwrap();
        assert_eq!(config.project_dir, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_invalid_entries_are_errors() {
        let dir = tempdir().unwrap();
        let err = Config::from_yaml("models:\n  planner: claude\n", dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModel { role: AgentRole::Planner, .. }));

        let err = Config::from_yaml("models:\n  architect: anthropic/x\n", dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = Config::from_yaml(
            "fallback_chain:\n  - provider: cohere\n    model: x\n",
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err =
            Config::from_yaml("retry:\n  request_timeout_seconds: 0\n", dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_reads_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taskloop.yaml");
        std::fs::write(&path, "run_id: nightly\nproject_dir: .\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.run_id, "nightly");

        let err = Config::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
