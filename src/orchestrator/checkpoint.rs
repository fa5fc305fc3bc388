//! SQLite checkpoint store.
//!
//! One row per run id holding the latest state snapshot and the node to run
//! next. Writes are single upserts inside a transaction, so a crash leaves
//! either the previous checkpoint or the new one, never a mix.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use super::graph::Node;
use super::state::OrchestrationState;

/// File name of the checkpoint database inside the checkpoint directory.
pub const CHECKPOINT_DB: &str = "checkpoints.db";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to create checkpoint directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Checkpoint database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Checkpoint state could not be encoded or decoded: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Checkpoint row is corrupt: {0}")]
    Corrupt(String),
}

/// Snapshot written after every node.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub run_id: String,
    /// Number of nodes executed so far in this run.
    pub step: u64,
    /// Node to execute on resume. `None` when the run reached its end.
    pub next: Option<Node>,
    pub state: OrchestrationState,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }
}

/// Summary row for listing runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub step: u64,
    pub next: Option<Node>,
    pub updated_at: DateTime<Utc>,
}

pub struct CheckpointStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl CheckpointStore {
    /// Open (or create) the store in `dir`.
    pub fn open(dir: &Path) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(dir).map_err(|source| CheckpointError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(CHECKPOINT_DB);
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.initialize_schema()?;
        tracing::debug!(path = %dir.display(), "Opened checkpoint store");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn initialize_schema(&self) -> Result<(), CheckpointError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT PRIMARY KEY,
                step INTEGER NOT NULL,
                next_node TEXT,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Atomically replace the checkpoint for `checkpoint.run_id`.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO checkpoints (run_id, step, next_node, state, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(run_id) DO UPDATE SET
                step = excluded.step,
                next_node = excluded.next_node,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
            params![
                checkpoint.run_id,
                checkpoint.step as i64,
                checkpoint.next.map(|n| n.as_str()),
                state,
                checkpoint.updated_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = self
            .conn()
            .query_row(
                "SELECT step, next_node, state, updated_at FROM checkpoints WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((step, next, state, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Checkpoint {
            run_id: run_id.to_string(),
            step: step.max(0) as u64,
            next: next
                .map(|n| n.parse::<Node>())
                .transpose()
                .map_err(CheckpointError::Corrupt)?,
            state: serde_json::from_str(&state)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    /// Delete every checkpoint. Returns the number of runs removed.
    pub fn clear(&self) -> Result<usize, CheckpointError> {
        Ok(self.conn().execute("DELETE FROM checkpoints", [])?)
    }

    /// Runs with a checkpoint, most recently updated first.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>, CheckpointError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT run_id, step, next_node, updated_at FROM checkpoints ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, step, next, updated_at) = row?;
            runs.push(RunSummary {
                run_id,
                step: step.max(0) as u64,
                next: next
                    .map(|n| n.parse::<Node>())
                    .transpose()
                    .map_err(CheckpointError::Corrupt)?,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(runs)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}
