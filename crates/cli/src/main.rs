//! `flowrelay` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`   : start the API server and the cron scheduler.
//! - `validate`: validate a workflow JSON file.
//! - `run`     : register a workflow file and run it once with the built-in adapters.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engine::{
    validate_workflow, EngineConfig, ExecutionReason, ExecutionStatus, SchedulerConfig, Workflow,
    WorkflowEngine, WorkflowScheduler,
};
use integrations::builtin::{EchoAdapter, LogAdapter, ECHO_SERVICE, LOG_SERVICE};
use integrations::{IntegrationCredentials, IntegrationRegistry};
use store::{FileStore, InMemoryStore, WorkflowStore};

#[derive(Parser)]
#[command(
    name = "flowrelay",
    about = "Cross-service workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Upper bound on loop iterations.
    #[arg(long, env = "FLOWRELAY_MAX_LOOP_ITERATIONS", default_value_t = 100)]
    max_loop_iterations: usize,
    /// Per-action timeout when an action does not set its own.
    #[arg(long, env = "FLOWRELAY_ACTION_TIMEOUT_MS", default_value_t = 30_000)]
    action_timeout_ms: u64,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            max_loop_iterations: self.max_loop_iterations,
            default_action_timeout_ms: self.action_timeout_ms,
            ..EngineConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server and the scheduler.
    Serve {
        #[arg(long, env = "FLOWRELAY_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Persist workflows as JSON files under this directory (in-memory otherwise).
        #[arg(long, env = "FLOWRELAY_WORKFLOWS_DIR")]
        workflows_dir: Option<PathBuf>,
        /// Scheduler tick interval.
        #[arg(long, env = "FLOWRELAY_TICK_MS", default_value_t = 1_000)]
        tick_ms: u64,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run a workflow file once and print its execution record.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Trigger payload as a JSON document.
        #[arg(long)]
        payload: Option<String>,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Serve {
            bind,
            workflows_dir,
            tick_ms,
            engine,
        } => serve(bind, workflows_dir, tick_ms, engine.config()).await,
        Command::Validate { path, engine } => {
            let workflow = load_workflow(&path)?;
            match validate_workflow(&workflow, &engine.config()) {
                Ok(()) => {
                    println!(
                        "Workflow '{}' is valid: {} trigger, {} top-level actions",
                        workflow.name,
                        workflow.trigger.kind(),
                        workflow.actions.len()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Run {
            path,
            payload,
            engine,
        } => run_once(&path, payload.as_deref(), engine.config()).await,
    }
}

/// A registry holding the adapters that need no external service.
fn builtin_registry() -> IntegrationRegistry {
    let registry = IntegrationRegistry::new();
    registry.register(
        ECHO_SERVICE,
        Arc::new(EchoAdapter),
        IntegrationCredentials::new(ECHO_SERVICE),
    );
    registry.register(
        LOG_SERVICE,
        Arc::new(LogAdapter),
        IntegrationCredentials::new(LOG_SERVICE),
    );
    registry
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn parse_payload(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

async fn serve(
    bind: String,
    workflows_dir: Option<PathBuf>,
    tick_ms: u64,
    config: EngineConfig,
) -> anyhow::Result<ExitCode> {
    let store: Arc<dyn WorkflowStore> = match workflows_dir {
        Some(dir) => Arc::new(
            FileStore::open(&dir)
                .await
                .with_context(|| format!("cannot open workflow store at {}", dir.display()))?,
        ),
        None => {
            info!("no --workflows-dir given; workflows are kept in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let registry = Arc::new(builtin_registry());
    let engine = WorkflowEngine::new(store, registry.clone(), config);
    let scheduler = Arc::new(WorkflowScheduler::new(engine.clone(), SchedulerConfig { tick_ms }));
    scheduler.start();

    info!("Starting API server on {bind}");
    let served = api::serve(&bind, api::AppState::new(engine.clone()), shutdown_signal()).await;

    scheduler.stop().await;
    engine.shutdown().await;
    registry.clear();

    served?;
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received; shutting down"),
        Err(e) => error!("cannot listen for Ctrl-C: {e}"),
    }
}

async fn run_once(path: &Path, payload: Option<&str>, config: EngineConfig) -> anyhow::Result<ExitCode> {
    let workflow = load_workflow(path)?;
    let payload = parse_payload(payload)?;

    let engine = WorkflowEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(builtin_registry()),
        config,
    );
    let id = engine
        .register_workflow(workflow)
        .await
        .context("workflow rejected")?;
    let record = engine.run(id, payload, ExecutionReason::Manual).await?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(if record.status == ExecutionStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
