mod autopilot;

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use marshal_activities::Activities;
use marshal_approval::{ApprovalDeps, ApprovalWorkflow, MultiStageApprovalWorkflow};
use marshal_config::{FleetConfig, OrchestratorConfig};
use marshal_dispatch::{Dispatcher, DispatcherStats, TaskAssignment};
use marshal_orchestration::{
  CleaningWorkflow, DeliveryWorkflow, OrchestrationDeps, ScheduledBatchWorkflow,
};
use marshal_runtime::{Engine, TracingNotifier, Workflow};

use crate::autopilot::Autopilot;

/// Marshal - durable workflows for a building's robot fleet
#[derive(Parser)]
#[command(name = "marshal")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.marshal)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to the configuration file (default: <data-dir>/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// List the registered workers
  Workers,

  /// Dispatch one task to the best matching worker
  Dispatch {
    /// Capability required, e.g. `cleaning.floor.deep`
    #[arg(long)]
    capability: String,

    #[arg(long)]
    worker_type: Option<String>,

    /// Worker to prefer when it can take the task
    #[arg(long)]
    prefer: Option<String>,
  },

  /// Run a workflow with its JSON input read from stdin
  Run {
    workflow: WorkflowKind,

    /// Instance id (default: generated)
    #[arg(long)]
    id: Option<String>,

    /// Approve every decision requested, as this approver
    #[arg(long, conflicts_with = "reject_as")]
    approve_as: Option<String>,

    /// Reject every decision requested, as this approver
    #[arg(long)]
    reject_as: Option<String>,

    /// Confirm delivery hand-offs as soon as the robot waits for them
    #[arg(long)]
    confirm: bool,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkflowKind {
  Cleaning,
  Delivery,
  Scheduled,
  Approval,
  MultiStageApproval,
}

#[derive(Serialize)]
struct DispatchOutput {
  assignment: TaskAssignment,
  stats: DispatcherStats,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  let data_dir = cli
    .data_dir
    .or_else(|| dirs::home_dir().map(|home| home.join(".marshal")));
  let config = load_config(cli.config, data_dir)?;
  init_tracing(&config);

  let fleet = if config.fleet.workers.is_empty() {
    FleetConfig::demo()
  } else {
    config.fleet.clone()
  };
  let dispatcher = Arc::new(Dispatcher::from_config(&fleet).context("failed to register fleet")?);

  match cli.command {
    Some(Commands::Workers) => {
      println!("{}", serde_json::to_string_pretty(&dispatcher.list_workers())?);
    }
    Some(Commands::Dispatch {
      capability,
      worker_type,
      prefer,
    }) => {
      let assignment = dispatcher
        .dispatch(
          &capability,
          serde_json::json!({}),
          worker_type.as_deref(),
          prefer.as_deref(),
        )
        .with_context(|| format!("failed to dispatch {capability}"))?;
      let output = DispatchOutput {
        assignment,
        stats: dispatcher.stats(),
      };
      println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Some(Commands::Run {
      workflow,
      id,
      approve_as,
      reject_as,
      confirm,
    }) => {
      let autopilot = Autopilot {
        approve_as,
        reject_as,
        confirm,
      };
      let rt = tokio::runtime::Runtime::new()?;
      let result = rt.block_on(run_workflow(workflow, id, autopilot, &config, dispatcher))?;
      println!("{}", serde_json::to_string_pretty(&result)?);
    }
    None => {
      println!("marshal - use --help to see available commands");
    }
  }

  Ok(())
}

/// An explicit path must exist; the data directory's config is optional.
fn load_config(path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<OrchestratorConfig> {
  if let Some(path) = path {
    return OrchestratorConfig::load(&path)
      .with_context(|| format!("failed to load config: {}", path.display()));
  }

  match data_dir.map(|dir| dir.join("config.json")) {
    Some(path) if path.exists() => OrchestratorConfig::load(&path)
      .with_context(|| format!("failed to load config: {}", path.display())),
    _ => Ok(OrchestratorConfig::default()),
  }
}

fn init_tracing(config: &OrchestratorConfig) {
  let filter = config
    .log_filter
    .as_deref()
    .and_then(|directive| EnvFilter::try_new(directive).ok())
    .or_else(|| EnvFilter::try_from_default_env().ok())
    .unwrap_or_else(|| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

async fn run_workflow(
  kind: WorkflowKind,
  id: Option<String>,
  autopilot: Autopilot,
  config: &OrchestratorConfig,
  dispatcher: Arc<Dispatcher>,
) -> Result<serde_json::Value> {
  let input = read_payload_from_stdin()?;
  let engine = Engine::with_notifier(TracingNotifier);
  let activities = Activities::simulated(dispatcher);

  let instance_id = match kind {
    WorkflowKind::Cleaning => {
      let deps = OrchestrationDeps::from_config(activities, config);
      start::<CleaningWorkflow>(&engine, id, input, deps).await?
    }
    WorkflowKind::Delivery => {
      let deps = OrchestrationDeps::from_config(activities, config);
      start::<DeliveryWorkflow>(&engine, id, input, deps).await?
    }
    WorkflowKind::Scheduled => {
      let deps = OrchestrationDeps::from_config(activities, config);
      start::<ScheduledBatchWorkflow>(&engine, id, input, deps).await?
    }
    WorkflowKind::Approval => {
      let deps = ApprovalDeps::from_config(&activities, config);
      start::<ApprovalWorkflow>(&engine, id, input, deps).await?
    }
    WorkflowKind::MultiStageApproval => {
      let deps = ApprovalDeps::from_config(&activities, config);
      start::<MultiStageApprovalWorkflow>(&engine, id, input, deps).await?
    }
  };
  eprintln!("Started: {instance_id}");

  let finished = async {
    autopilot.drive(&engine, &instance_id).await;
    engine.result_json(&instance_id).await
  };
  let result = tokio::select! {
    result = finished => result?,
    _ = tokio::signal::ctrl_c() => {
      eprintln!("Interrupted, cancelling {instance_id}");
      engine.cancel(&instance_id).await?;
      engine.result_json(&instance_id).await?
    }
  };

  Ok(result)
}

async fn start<W: Workflow>(
  engine: &Engine,
  id: Option<String>,
  input: serde_json::Value,
  deps: W::Deps,
) -> Result<String> {
  let input: W::Input = serde_json::from_value(input)
    .with_context(|| format!("failed to parse {} input", W::TYPE))?;
  let handle = engine
    .start::<W>(id, input, deps)
    .await
    .with_context(|| format!("failed to start {} workflow", W::TYPE))?;
  Ok(handle.id().to_string())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
