use async_trait::async_trait;
use marshal_activities::{
  Channel, CompletionStatus, FloorCondition, Notification, ReceiptStatus, RobotTask,
  TaskCompletion, floor_number,
};
use marshal_runtime::{SignalOutcome, ValidationError, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::deps::OrchestrationDeps;
use crate::steps::{self, Halt, Reservations, Route, STATION, STATION_FLOOR};

const ZONE_ACCESS_MINUTES: u32 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningMode {
  #[default]
  Standard,
  Deep,
  Quick,
}

impl CleaningMode {
  pub fn as_str(self) -> &'static str {
    match self {
      CleaningMode::Standard => "standard",
      CleaningMode::Deep => "deep",
      CleaningMode::Quick => "quick",
    }
  }

  /// Capability a robot needs for this mode.
  pub fn capability(self) -> String {
    format!("cleaning.floor.{}", self.as_str())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningInput {
  pub floor_id: String,
  /// Defaults to `<floor_id>-zone-a`.
  #[serde(default)]
  pub zone_id: Option<String>,
  #[serde(default)]
  pub cleaning_mode: CleaningMode,
  /// Use this robot instead of picking one.
  #[serde(default)]
  pub robot_id: Option<String>,
  /// 1 (highest) to 5.
  #[serde(default = "steps::default_priority")]
  pub priority: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningStatus {
  #[default]
  Pending,
  Running,
  Cancelling,
  Completed,
  Failed,
  Cancelled,
}

impl CleaningStatus {
  fn is_terminal(self) -> bool {
    matches!(
      self,
      CleaningStatus::Completed | CleaningStatus::Failed | CleaningStatus::Cancelled
    )
  }
}

impl std::fmt::Display for CleaningStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CleaningStatus::Pending => "pending",
      CleaningStatus::Running => "running",
      CleaningStatus::Cancelling => "cancelling",
      CleaningStatus::Completed => "completed",
      CleaningStatus::Failed => "failed",
      CleaningStatus::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningState {
  pub status: CleaningStatus,
  /// 0 to 100.
  pub progress: u8,
  pub current_step: String,
  pub robot_id: Option<String>,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum CleaningSignal {
  Cancel {
    #[serde(default)]
    reason: Option<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningResult {
  pub success: bool,
  pub status: CleaningStatus,
  pub robot_id: Option<String>,
  pub floor_id: String,
  pub zone_id: String,
  pub duration_minutes: u32,
  pub area_cleaned_sqm: f64,
  pub message: String,
}

/// Clean one floor zone with a single robot.
pub struct CleaningWorkflow;

impl CleaningWorkflow {
  fn step(ctx: &mut WorkflowContext<Self>, step: &str, progress: u8) {
    info!(step = %step, progress, "cleaning_step");
    ctx.update(|s| {
      s.current_step = step.to_string();
      s.progress = progress;
    });
  }

  async fn execute(
    ctx: &mut WorkflowContext<Self>,
    deps: &OrchestrationDeps,
    input: &CleaningInput,
    zone_id: &str,
    reservations: &mut Reservations,
  ) -> Result<TaskCompletion, Halt> {
    Self::step(ctx, "checking_floor_status", 10);
    let floor = steps::floor_status(ctx, deps, &input.floor_id).await?;
    if floor.status != FloorCondition::Normal {
      return Err(Halt::Failed(format!(
        "Floor status is {}, cannot clean",
        floor.status
      )));
    }
    steps::checkpoint(ctx)?;

    Self::step(ctx, "finding_robot", 20);
    let capability = input.cleaning_mode.capability();
    let lease = steps::acquire_robot(
      ctx,
      deps,
      &capability,
      input.robot_id.as_deref(),
      floor_number(&input.floor_id),
    )
    .await?;
    reservations.lease = Some(lease.clone());
    let robot_id = lease.robot_id.clone();
    ctx.update(|s| s.robot_id = Some(robot_id.clone()));
    steps::checkpoint(ctx)?;

    Self::step(ctx, "preparing", 30);
    let route = Route {
      robot_id: &robot_id,
      from: STATION,
      from_floor: STATION_FLOOR,
      to: &input.floor_id,
      zone: Some((zone_id.to_string(), ZONE_ACCESS_MINUTES)),
    };
    steps::prepare_route(ctx, deps, reservations, route).await?;
    steps::checkpoint(ctx)?;

    Self::step(ctx, "assigning_task", 50);
    let task = RobotTask {
      robot_id: robot_id.clone(),
      lease_id: lease.lease_id.clone(),
      task_type: "cleaning".to_string(),
      parameters: json!({
        "floor_id": input.floor_id,
        "zone_id": zone_id,
        "mode": input.cleaning_mode.as_str(),
      }),
      priority: input.priority,
    };
    let receipt = steps::assign_task(ctx, deps, task).await?;
    if receipt.status != ReceiptStatus::Assigned {
      return Err(Halt::Failed(format!(
        "Task assignment failed: {}",
        receipt.reason.as_deref().unwrap_or("unknown")
      )));
    }
    steps::checkpoint(ctx)?;

    Self::step(ctx, "cleaning", 60);
    let completion = steps::await_completion(ctx, deps, &receipt.task_id).await?;
    if completion.status != CompletionStatus::Completed {
      return Err(Halt::Failed(format!(
        "Cleaning task {} reported failure",
        completion.task_id
      )));
    }
    Ok(completion)
  }
}

#[async_trait]
impl Workflow for CleaningWorkflow {
  const TYPE: &'static str = "cleaning";
  type Input = CleaningInput;
  type Output = CleaningResult;
  type State = CleaningState;
  type Signal = CleaningSignal;
  type Deps = OrchestrationDeps;

  fn validate(input: &CleaningInput) -> Result<(), ValidationError> {
    if input.floor_id.trim().is_empty() {
      return Err(ValidationError::new("floor_id", "must not be empty"));
    }
    if !(1..=5).contains(&input.priority) {
      return Err(ValidationError::new("priority", "must be between 1 and 5"));
    }
    Ok(())
  }

  fn on_signal(state: &mut CleaningState, signal: CleaningSignal) -> SignalOutcome {
    match signal {
      CleaningSignal::Cancel { reason } => {
        if state.status.is_terminal() || state.status == CleaningStatus::Cancelling {
          return SignalOutcome::Ignored;
        }
        state.status = CleaningStatus::Cancelling;
        state.error = Some(match reason {
          Some(reason) if !reason.is_empty() => format!("Cancelled: {reason}"),
          _ => "Cancelled by user".to_string(),
        });
        SignalOutcome::Cancel
      }
    }
  }

  async fn run(
    ctx: &mut WorkflowContext<Self>,
    deps: OrchestrationDeps,
    input: CleaningInput,
  ) -> CleaningResult {
    ctx.update(|s| s.status = CleaningStatus::Running);
    info!(floor_id = %input.floor_id, mode = input.cleaning_mode.as_str(), "cleaning_started");

    let zone_id = input
      .zone_id
      .clone()
      .unwrap_or_else(|| format!("{}-zone-a", input.floor_id));
    let mut reservations = Reservations::default();
    let outcome = steps::guarded(Self::execute(
      ctx,
      &deps,
      &input,
      &zone_id,
      &mut reservations,
    ))
    .await;

    let success = outcome.is_ok();
    if success {
      Self::step(ctx, "tearing_down", 80);
    } else {
      ctx.update(|s| s.current_step = "tearing_down".to_string());
    }
    steps::teardown(ctx, &deps, &mut reservations, success).await;

    let (status, message, completion) = match outcome {
      Ok(completion) => (
        CleaningStatus::Completed,
        "Cleaning completed successfully".to_string(),
        Some(completion),
      ),
      Err(Halt::Cancelled) => (
        CleaningStatus::Cancelled,
        ctx
          .state()
          .error
          .clone()
          .unwrap_or_else(|| "Cancelled by user".to_string()),
        None,
      ),
      Err(Halt::Failed(message)) => (CleaningStatus::Failed, message, None),
    };

    let robot_id = ctx.state().robot_id.clone();
    let report = match &completion {
      Some(done) => Notification::new(
        Channel::Ops,
        format!("Cleaning completed: {}", input.floor_id),
      )
      .with("robot_id", robot_id.clone())
      .with("floor_id", input.floor_id.clone())
      .with("duration_minutes", done.duration_minutes),
      None => Notification::new(
        Channel::Ops,
        format!("Cleaning {status}: {} - {message}", input.floor_id),
      )
      .with("robot_id", robot_id.clone())
      .with("error", message.clone()),
    };
    if success {
      Self::step(ctx, "notifying", 90);
    }
    steps::report(ctx, &deps, report).await;

    ctx.update(|s| {
      s.status = status;
      if success {
        s.progress = 100;
        s.current_step = "completed".to_string();
      } else {
        s.error.get_or_insert_with(|| message.clone());
      }
    });
    info!(?status, robot_id = ?robot_id, "cleaning_finished");

    CleaningResult {
      success,
      status,
      robot_id,
      floor_id: input.floor_id,
      zone_id,
      duration_minutes: completion.as_ref().map_or(0, |c| c.duration_minutes),
      area_cleaned_sqm: completion.as_ref().map_or(0.0, |c| c.area_cleaned_sqm),
      message,
    }
  }
}
