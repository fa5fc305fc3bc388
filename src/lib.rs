//! # taskloop
//!
//! A resumable orchestrator that works through a dependency-ordered task plan
//! with four model-backed roles.
//!
//! This library provides:
//! - A task source and dependency scheduler
//! - Planner, Implementer, Reviewer and Committer roles
//! - An inference router with per-role preferences, fallback and cooldown
//! - A sandboxed tool set for the roles (files, search, allow-listed commands)
//! - A SQLite checkpoint store so any run can be resumed
//!
//! ## Architecture
//!
//! ```text
//!                 ┌─────────────┐
//!        ┌───────▶│   Planner   │──── nothing runnable ───▶ end
//!        │        └──────┬──────┘
//!        │               ▼
//!        │        ┌─────────────┐
//!        │   ┌───▶│ Implementer │◀──────┐
//!        │   │    └──────┬──────┘       │ rejected,
//!        │   │           ▼              │ retries left
//!        │   │    ┌─────────────┐       │
//!        │   │    │  Reviewer   │───────┘
//!        │   │    └──────┬──────┘
//!        │   │           │ approved         rejected, retries spent
//!        │   │           ▼                  (task marked failed) ──▶ Planner
//!        │   │    ┌─────────────┐
//!        └───┼────│  Committer  │
//!            │    └─────────────┘
//!            │
//!      ModelRouter ── anthropic / openai / google / openrouter
//! ```
//!
//! Every node returns a partial state update; the orchestrator merges it and
//! writes a checkpoint before moving on.
//!
//! ## Modules
//! - `task`: task records, the Markdown task source and scheduling
//! - `llm`: provider clients and the inference router
//! - `tools`: the tool set exposed to the roles and the git working tree
//! - `agents`: the four roles
//! - `orchestrator`: state, routing, checkpoints and the control loop
//! - `config`: YAML and environment configuration

pub mod agents;
pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod task;
pub mod tools;

pub use config::Config;
pub use orchestrator::{Orchestrator, RunOutcome};
