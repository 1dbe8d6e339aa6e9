use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use prompt_lab_core::{EventBus, Repository, TaskId, TaskStatus};
use prompt_lab_engine::{
    DefaultTaskEngine, ProgressChannel, ProgressEvent, Task, TaskEngine, TaskRepository,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod checkpoint;
mod config;
mod matrix;
mod simulated;

use checkpoint::FileTaskRepository;
use config::{AppConfig, LogFormat};
use matrix::MatrixFile;
use simulated::{ContainsExpectedEvaluator, SimulatedModelCaller};

/// Runs prompt x model x dataset evaluation matrices.
#[derive(Debug, Parser)]
#[command(name = "prompt-lab", version, about)]
struct Cli {
    /// Log output format (overrides configuration)
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Checkpoint directory (overrides configuration)
    #[arg(long, global = true, env = "PROMPT_LAB_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a test matrix from a JSON file
    Run {
        /// Path to the matrix file
        matrix: PathBuf,

        /// Maximum number of concurrent model calls
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Additional attempts per failed call
        #[arg(long)]
        retries: Option<u32>,

        /// Per-call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Continue a paused, stopped or failed task from its last checkpoint
    Resume {
        task_id: Uuid,
    },

    /// Re-run the failed items of a finished task
    Retry {
        task_id: Uuid,
    },

    /// Show the stats of a checkpointed task
    Status {
        task_id: Uuid,
    },

    /// List checkpointed tasks
    List,
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into());

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load().context("loading configuration")?;
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(dir) = cli.checkpoint_dir {
        config.checkpoint_dir = dir;
    }

    init_tracing(&config);
    prompt_lab_engine::telemetry::describe_metrics();
    tracing::info!("Starting prompt-lab");

    let repository = Arc::new(FileTaskRepository::open(&config.checkpoint_dir).await?);
    tracing::info!("Checkpoints in {}", config.checkpoint_dir.display());

    match cli.command {
        Command::Run {
            matrix,
            concurrency,
            retries,
            timeout_ms,
        } => {
            let mut run_config = config.run.clone();
            if let Some(concurrency) = concurrency {
                run_config.concurrency = concurrency;
            }
            if let Some(retries) = retries {
                run_config.retry_count = retries;
            }
            if let Some(timeout_ms) = timeout_ms {
                run_config.timeout_ms = timeout_ms;
            }

            let (name, matrix) = MatrixFile::read(&matrix).await?.into_matrix()?;
            let task = Task::new(name, matrix, run_config);
            tracing::info!("Created task {} with {} work items", task.id, task.plan.len());

            let engine = build_engine(&config, repository);
            let task_id = task.id;
            watch(&engine, task_id);

            let status = engine.run(task).await?;
            report(&engine, task_id, status).await
        }
        Command::Resume { task_id } => {
            let task = load(repository.as_ref(), task_id).await?;
            let engine = build_engine(&config, repository);
            let task_id = task.id;
            let adopted = engine.adopt(task).await?;
            watch(&engine, task_id);

            let status = match adopted {
                TaskStatus::Paused => engine.resume(task_id).await?,
                TaskStatus::Stopped | TaskStatus::Failed => engine.resume_interrupted(task_id).await?,
                other => bail!("task {} is {} and cannot be resumed", task_id, other),
            };
            report(&engine, task_id, status).await
        }
        Command::Retry { task_id } => {
            let task = load(repository.as_ref(), task_id).await?;
            let engine = build_engine(&config, repository);
            let task_id = task.id;
            engine.adopt(task).await?;
            watch(&engine, task_id);

            let resubmitted = engine.retry_failed(task_id).await?;
            tracing::info!("Resubmitted {} items", resubmitted);
            let status = engine.snapshot(task_id).await?.status;
            report(&engine, task_id, status).await
        }
        Command::Status { task_id } => {
            let task = load(repository.as_ref(), task_id).await?;
            print_summary(&task)
        }
        Command::List => {
            for task in repository.list().await? {
                println!(
                    "{}  {:<10} {:>5}/{:<5} {}",
                    task.id, task.status, task.progress.completed, task.progress.total, task.name
                );
            }
            Ok(())
        }
    }
}

fn build_engine(config: &AppConfig, repository: Arc<FileTaskRepository>) -> DefaultTaskEngine {
    let progress = Arc::new(ProgressChannel::new(config.run.progress_buffer));
    let caller = Arc::new(SimulatedModelCaller::new(config.simulation.clone()));

    let engine = DefaultTaskEngine::new(caller, progress)
        .with_evaluator(Arc::new(ContainsExpectedEvaluator))
        .with_event_bus(EventBus::default())
        .with_repository(repository);

    // Ctrl-C asks the running task to stop at the next item boundary.
    let handle = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            for task_id in handle.task_ids().await {
                if let Err(e) = handle.stop(task_id).await {
                    tracing::debug!("Not stopping task {}: {}", task_id, e);
                }
            }
        }
    });

    engine
}

fn watch(engine: &DefaultTaskEngine, task_id: TaskId) {
    // dropping the handle detaches the listener; it ends with the process
    let _ = engine.subscribe_with(task_id, |event| match event {
        ProgressEvent::Progress { completed, total, failed, .. } => {
            tracing::info!("Progress {}/{} ({} failed)", completed, total, failed);
        }
        other => tracing::info!("Run ended: {}", other.kind()),
    });
}

async fn load(repository: &FileTaskRepository, task_id: Uuid) -> Result<Task> {
    repository
        .find_by_id(&TaskId::from_uuid(task_id))
        .await?
        .with_context(|| format!("no checkpoint for task {}", task_id))
}

async fn report(engine: &DefaultTaskEngine, task_id: TaskId, status: TaskStatus) -> Result<()> {
    let task = engine.snapshot(task_id).await?;
    tracing::info!("Task {} ended as {}", task_id, status);
    print_summary(&task)
}

fn print_summary(task: &Task) -> Result<()> {
    let summary = serde_json::json!({
        "task_id": task.id,
        "name": task.name,
        "status": task.status,
        "error": task.error,
        "progress": task.progress,
        "stats": task.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
