//! taskloop command line.
//!
//! ```text
//! taskloop [--config PATH] [--run-id ID] run
//! taskloop resume
//! taskloop status
//! taskloop reset [--yes]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use taskloop::orchestrator::{CheckpointStore, OrchestratorError};
use taskloop::task::{parse_orchestration_file, TaskGraph};
use taskloop::{Config, Orchestrator, RunOutcome};

#[derive(Parser)]
#[command(
    name = "taskloop",
    about = "Drive a task plan through planner, implementer, reviewer and committer agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: $TASKLOOP_CONFIG, then ./config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Checkpoint key of the run
    #[arg(long, global = true)]
    run_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh run from the task document
    Run,

    /// Continue the last run from its checkpoint
    Resume,

    /// Show the state of the last run
    Status,

    /// Delete all checkpoint state
    Reset {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }

    let writes_log = matches!(cli.command, Commands::Run | Commands::Resume);
    init_logging(&config, writes_log)?;

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Resume => resume(&config).await,
        Commands::Status => status(&config),
        Commands::Reset { yes } => reset(&config, yes),
    }
}

/// Console output plus, for runs, a JSON-lines file in the log directory.
fn init_logging(config: &Config, with_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    let file_layer = if with_file {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let path = config.log_dir.join(format!(
            "run_{}.jsonl",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(Arc::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<CheckpointStore>> {
    let store = CheckpointStore::open(&config.checkpoint_dir).with_context(|| {
        format!(
            "Failed to open checkpoint store in {}",
            config.checkpoint_dir.display()
        )
    })?;
    Ok(Arc::new(store))
}

async fn run(config: &Config) -> Result<()> {
    let tasks = parse_orchestration_file(&config.orchestration_file)?;
    let graph = TaskGraph::new(tasks, config.strict_graph).context("Invalid task graph")?;
    for issue in graph.issues() {
        tracing::warn!(%issue, "Task graph issue");
    }

    tracing::info!(
        project_dir = %config.project_dir.display(),
        tasks = graph.tasks().len(),
        run_id = %config.run_id,
        "Loaded task document"
    );

    let orchestrator = Orchestrator::from_config(config, open_store(config)?);
    drive(orchestrator.run(graph.into_tasks())).await
}

async fn resume(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let Some(checkpoint) = store.load(&config.run_id)? else {
        println!(
            "No checkpoint found for run '{}'. Use `taskloop run` to start.",
            config.run_id
        );
        return Ok(());
    };
    if checkpoint.is_terminal() {
        println!(
            "Run '{}' already finished at step {}. Use `taskloop reset` then `taskloop run` to start over.",
            checkpoint.run_id, checkpoint.step
        );
        return Ok(());
    }

    let orchestrator = Orchestrator::from_config(config, store);
    drive(orchestrator.resume(checkpoint)).await
}

/// Await a run, stopping cleanly on Ctrl-C.
async fn drive(
    run: impl std::future::Future<Output = Result<RunOutcome, OrchestratorError>>,
) -> Result<()> {
    let outcome = tokio::select! {
        outcome = run => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            println!("\nInterrupted. Progress is checkpointed; continue with `taskloop resume`.");
            return Ok(());
        }
    };

    match outcome {
        Ok(RunOutcome::Completed) => {
            println!("All tasks completed.");
            Ok(())
        }
        Ok(RunOutcome::Incomplete { failed, skipped }) => {
            let join = |ids: &[taskloop::task::TaskId]| {
                ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
            };
            println!("Run finished with unfinished tasks.");
            if !failed.is_empty() {
                println!("  Failed (review retries exhausted): {}", join(&failed));
            }
            if !skipped.is_empty() {
                println!("  Skipped (nothing to commit): {}", join(&skipped));
            }
            Ok(())
        }
        Ok(RunOutcome::Blocked { pending }) => {
            let ids: Vec<&str> = pending.iter().map(|id| id.as_str()).collect();
            println!("Run stopped: remaining tasks are blocked: {}", ids.join(", "));
            Ok(())
        }
        Err(e @ OrchestratorError::Checkpoint(_)) => Err(e.into()),
        Err(e) => {
            println!("Run halted: {e}\nFix the cause and continue with `taskloop resume`.");
            Err(e.into())
        }
    }
}

fn status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let Some(checkpoint) = store.load(&config.run_id)? else {
        println!("No checkpoint found for run '{}'.", config.run_id);
        let runs = store.list_runs()?;
        if !runs.is_empty() {
            println!("\nStored runs:");
            for run in runs {
                println!(
                    "  {} (step {}, next {}, updated {})",
                    run.run_id,
                    run.step,
                    run.next.map(|n| n.as_str()).unwrap_or("finished"),
                    run.updated_at.to_rfc3339()
                );
            }
        }
        return Ok(());
    };
    let state = &checkpoint.state;

    println!("Run:          {} (step {})", checkpoint.run_id, checkpoint.step);
    println!(
        "Next:         {}",
        checkpoint.next.map(|n| n.as_str()).unwrap_or("finished")
    );
    println!("Updated:      {}", checkpoint.updated_at.to_rfc3339());

    let counts: Vec<String> = state
        .status_counts()
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(status, n)| format!("{n} {status}"))
        .collect();
    println!("Tasks:        {} ({})", state.tasks.len(), counts.join(", "));

    match &state.current_task {
        Some(task) => println!("Current task: {} - {}", task.id, task.title),
        None => println!("Current task: none"),
    }
    if !state.phase.is_empty() {
        println!("Phase:        {}", state.phase);
    }
    println!(
        "Current LLM:  {}",
        if state.current_llm.is_empty() { "none" } else { &state.current_llm }
    );
    println!("Git dirty:    {}", state.git_dirty);
    println!("Retry count:  {}", state.retry_count);
    if let Some(error) = &state.error {
        println!("Last error:   {error}");
    }

    if !state.token_usage.is_empty() {
        println!("\nToken usage:");
        for (model, tally) in &state.token_usage {
            println!("  {model}: {} in, {} out", tally.input, tally.output);
        }
    }

    println!("\nTasks:");
    for task in &state.tasks {
        let status = state.status_of(&task.id);
        println!("  [{}] {}: {}", status.icon(), task.id, task.title);
    }
    Ok(())
}

fn reset(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        print!(
            "Delete all checkpoint state in {}? [y/N] ",
            config.checkpoint_dir.display()
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = open_store(config)?.clear()?;
    tracing::info!(removed, "Checkpoint state cleared");
    println!("Cleared {removed} checkpoint(s).");
    Ok(())
}
