use async_trait::async_trait;
use marshal_activities::{
  Channel, CompletionStatus, FloorCondition, Notification, ReceiptStatus, RobotLease, RobotTask,
  floor_number, floor_of,
};
use marshal_runtime::{SignalOutcome, ValidationError, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::cleaning::CleaningMode;
use crate::deps::OrchestrationDeps;
use crate::steps::{self, Halt, Reservations, Route, STATION, STATION_FLOOR};

const PATROL_CAPABILITY: &str = "patrol.route";
const LOCATION_ACCESS_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
  Cleaning,
  Patrol,
}

impl BatchKind {
  fn as_str(self) -> &'static str {
    match self {
      BatchKind::Cleaning => "cleaning",
      BatchKind::Patrol => "patrol",
    }
  }

  fn channel(self) -> Channel {
    match self {
      BatchKind::Cleaning => Channel::Ops,
      BatchKind::Patrol => Channel::Security,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledBatchInput {
  pub task_type: BatchKind,
  /// Visited in order.
  pub target_locations: Vec<String>,
  pub schedule_name: String,
  #[serde(default = "steps::default_priority")]
  pub priority: u8,
  #[serde(default)]
  pub robot_id: Option<String>,
  /// `cleaning_mode` for cleaning batches, `check_items` for patrols.
  #[serde(default)]
  pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ScheduledBatchInput {
  fn cleaning_mode(&self) -> Result<CleaningMode, serde_json::Error> {
    match self.parameters.get("cleaning_mode") {
      Some(mode) => serde_json::from_value(mode.clone()),
      None => Ok(CleaningMode::default()),
    }
  }

  fn capability(&self) -> String {
    match self.task_type {
      BatchKind::Cleaning => self.cleaning_mode().unwrap_or_default().capability(),
      BatchKind::Patrol => PATROL_CAPABILITY.to_string(),
    }
  }

  fn task_parameters(&self, location: &str) -> serde_json::Value {
    match self.task_type {
      BatchKind::Cleaning => json!({
        "location": location,
        "mode": self.cleaning_mode().unwrap_or_default().as_str(),
      }),
      BatchKind::Patrol => json!({
        "checkpoint": location,
        "check_items": self
          .parameters
          .get("check_items")
          .cloned()
          .unwrap_or_else(|| json!(["security", "safety"])),
      }),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
  #[default]
  Pending,
  AssigningRobot,
  Running,
  Completed,
  Cancelled,
  Failed,
}

impl BatchStatus {
  fn is_terminal(self) -> bool {
    matches!(
      self,
      BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Failed
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
  pub checkpoint: String,
  pub anomaly_type: String,
  pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduledBatchState {
  pub status: BatchStatus,
  pub robot_id: Option<String>,
  pub current_location: Option<String>,
  /// Locations not yet visited, in order.
  pub pending_locations: Vec<String>,
  pub completed_locations: Vec<String>,
  pub failed_locations: Vec<String>,
  pub skip_requests: Vec<String>,
  pub anomalies: Vec<Anomaly>,
  pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ScheduledBatchSignal {
  Cancel {
    #[serde(default)]
    reason: Option<String>,
  },
  /// Skip a location that has not been visited yet.
  SkipLocation { location: String },
  ReportAnomaly {
    checkpoint: String,
    anomaly_type: String,
    description: String,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledBatchResult {
  pub success: bool,
  pub status: BatchStatus,
  pub task_type: BatchKind,
  pub schedule_name: String,
  pub robot_id: Option<String>,
  pub locations_completed: Vec<String>,
  pub locations_failed: Vec<String>,
  /// Not reached because the batch stopped early.
  pub locations_remaining: Vec<String>,
  pub anomalies: Vec<Anomaly>,
  pub message: String,
  pub total_duration_minutes: f64,
}

enum Visit {
  Done,
  Skipped(String),
}

/// Visit a list of locations with one robot, cleaning or patrolling each.
pub struct ScheduledBatchWorkflow;

impl ScheduledBatchWorkflow {
  /// Pop the next location and mark it current.
  fn next_location(ctx: &mut WorkflowContext<Self>) -> Option<String> {
    ctx.update(|s| {
      if s.pending_locations.is_empty() {
        s.current_location = None;
        return None;
      }
      let location = s.pending_locations.remove(0);
      s.current_location = Some(location.clone());
      Some(location)
    })
  }

  async fn visit(
    ctx: &mut WorkflowContext<Self>,
    deps: &OrchestrationDeps,
    input: &ScheduledBatchInput,
    lease: &RobotLease,
    from: &str,
    location: &str,
    reservations: &mut Reservations,
  ) -> Result<Visit, Halt> {
    if input.task_type == BatchKind::Cleaning {
      let floor = steps::floor_status(ctx, deps, floor_of(location)).await?;
      if floor.occupied {
        return Ok(Visit::Skipped("area occupied".to_string()));
      }
      if floor.status != FloorCondition::Normal {
        return Ok(Visit::Skipped(format!("floor is {}", floor.status)));
      }
      steps::checkpoint(ctx)?;
    }

    let route = Route {
      robot_id: &lease.robot_id,
      from,
      from_floor: floor_number(from),
      to: location,
      zone: Some((location.to_string(), LOCATION_ACCESS_MINUTES)),
    };
    steps::prepare_route(ctx, deps, reservations, route).await?;
    steps::checkpoint(ctx)?;

    let task = RobotTask {
      robot_id: lease.robot_id.clone(),
      lease_id: lease.lease_id.clone(),
      task_type: input.task_type.as_str().to_string(),
      parameters: input.task_parameters(location),
      priority: input.priority,
    };
    let receipt = steps::assign_task(ctx, deps, task).await?;
    if receipt.status != ReceiptStatus::Assigned {
      return Err(Halt::Failed(format!(
        "Task assignment failed: {}",
        receipt.reason.as_deref().unwrap_or("unknown")
      )));
    }

    let completion = steps::await_completion(ctx, deps, &receipt.task_id).await?;
    if completion.status != CompletionStatus::Completed {
      return Err(Halt::Failed(format!("Robot reported failure at {location}")));
    }
    Ok(Visit::Done)
  }

  /// Visit every pending location. Returns false when stopped by a cancel.
  async fn run_locations(
    ctx: &mut WorkflowContext<Self>,
    deps: &OrchestrationDeps,
    input: &ScheduledBatchInput,
    lease: &RobotLease,
    reservations: &mut Reservations,
  ) -> bool {
    let kind = input.task_type;
    let mut from = STATION.to_string();

    while !ctx.is_cancelled() {
      let Some(location) = Self::next_location(ctx) else {
        return true;
      };

      if ctx.state().skip_requests.contains(&location) {
        info!(location = %location, "location_skipped_on_request");
        ctx.update(|s| s.failed_locations.push(location.clone()));
        steps::task_update(ctx, deps, kind.channel(), format!("Skipped {location} on request")).await;
        continue;
      }

      let outcome = steps::guarded(Self::visit(
        ctx,
        deps,
        input,
        lease,
        &from,
        &location,
        reservations,
      ))
      .await;
      steps::release_access(ctx, deps, reservations).await;

      match outcome {
        Ok(Visit::Done) => {
          info!(location = %location, "location_completed");
          ctx.update(|s| s.completed_locations.push(location.clone()));
          let update = match kind {
            BatchKind::Cleaning => format!("Completed cleaning {location}"),
            BatchKind::Patrol => format!("Checkpoint {location} cleared"),
          };
          steps::task_update(ctx, deps, kind.channel(), update).await;
          from = location;
        }
        Ok(Visit::Skipped(reason)) => {
          info!(location = %location, reason = %reason, "location_skipped");
          ctx.update(|s| s.failed_locations.push(location.clone()));
          steps::task_update(ctx, deps, kind.channel(), format!("Skipped {location} - {reason}")).await;
        }
        Err(Halt::Failed(message)) => {
          warn!(location = %location, error = %message, "location_failed");
          ctx.update(|s| {
            s.failed_locations.push(location.clone());
            if kind == BatchKind::Patrol {
              s.anomalies.push(Anomaly {
                checkpoint: location.clone(),
                anomaly_type: "access_error".to_string(),
                description: message.clone(),
              });
            }
          });
          from = location;
        }
        Err(Halt::Cancelled) => {
          info!(location = %location, "location_interrupted");
          ctx.update(|s| s.failed_locations.push(location.clone()));
          return false;
        }
      }
    }
    false
  }
}

#[async_trait]
impl Workflow for ScheduledBatchWorkflow {
  const TYPE: &'static str = "scheduled-batch";
  type Input = ScheduledBatchInput;
  type Output = ScheduledBatchResult;
  type State = ScheduledBatchState;
  type Signal = ScheduledBatchSignal;
  type Deps = OrchestrationDeps;

  fn validate(input: &ScheduledBatchInput) -> Result<(), ValidationError> {
    if input.schedule_name.trim().is_empty() {
      return Err(ValidationError::new("schedule_name", "must not be empty"));
    }
    if input.target_locations.is_empty() {
      return Err(ValidationError::new(
        "target_locations",
        "at least one location is required",
      ));
    }
    if input.target_locations.iter().any(|l| l.trim().is_empty()) {
      return Err(ValidationError::new(
        "target_locations",
        "locations must not be empty",
      ));
    }
    if !(1..=5).contains(&input.priority) {
      return Err(ValidationError::new("priority", "must be between 1 and 5"));
    }
    if let Err(e) = input.cleaning_mode() {
      return Err(ValidationError::new(
        "parameters.cleaning_mode",
        e.to_string(),
      ));
    }
    Ok(())
  }

  fn on_signal(state: &mut ScheduledBatchState, signal: ScheduledBatchSignal) -> SignalOutcome {
    if state.status.is_terminal() {
      return SignalOutcome::Ignored;
    }
    match signal {
      ScheduledBatchSignal::Cancel { reason } => {
        if state.cancel_reason.is_some() {
          return SignalOutcome::Ignored;
        }
        state.cancel_reason = Some(reason.unwrap_or_else(|| "cancelled by user".to_string()));
        SignalOutcome::Cancel
      }
      ScheduledBatchSignal::SkipLocation { location } => {
        if !state.pending_locations.contains(&location) || state.skip_requests.contains(&location) {
          return SignalOutcome::Ignored;
        }
        state.skip_requests.push(location);
        SignalOutcome::Applied
      }
      ScheduledBatchSignal::ReportAnomaly {
        checkpoint,
        anomaly_type,
        description,
      } => {
        state.anomalies.push(Anomaly {
          checkpoint,
          anomaly_type,
          description,
        });
        SignalOutcome::Applied
      }
    }
  }

  async fn run(
    ctx: &mut WorkflowContext<Self>,
    deps: OrchestrationDeps,
    input: ScheduledBatchInput,
  ) -> ScheduledBatchResult {
    let kind = input.task_type;
    let total = input.target_locations.len();
    info!(
      schedule = %input.schedule_name,
      task_type = kind.as_str(),
      locations = total,
      "batch_started"
    );
    ctx.update(|s| {
      s.status = BatchStatus::AssigningRobot;
      s.pending_locations = input.target_locations.clone();
    });

    let mut reservations = Reservations::default();
    let capability = input.capability();
    let first_floor = input
      .target_locations
      .first()
      .map_or(STATION_FLOOR, |l| floor_number(l));
    let acquired = steps::guarded(steps::acquire_robot(
      ctx,
      &deps,
      &capability,
      input.robot_id.as_deref(),
      first_floor,
    ))
    .await;

    let halted = match acquired {
      Ok(lease) => {
        reservations.lease = Some(lease.clone());
        ctx.update(|s| {
          s.robot_id = Some(lease.robot_id.clone());
          s.status = BatchStatus::Running;
        });

        let started = Notification::new(
          kind.channel(),
          format!("Scheduled {} started: {}", kind.as_str(), input.schedule_name),
        )
        .with("robot_id", lease.robot_id.clone())
        .with("locations", input.target_locations.clone());
        steps::announce(ctx, &deps, started).await;

        let finished = Self::run_locations(ctx, &deps, &input, &lease, &mut reservations).await;
        (!finished).then_some(Halt::Cancelled)
      }
      Err(halt) => Some(halt),
    };

    let state = ctx.state().clone();
    let failed_all = matches!(halted, Some(Halt::Failed(_)));
    let mut failed = state.failed_locations.clone();
    let mut remaining = state.pending_locations.clone();
    if failed_all {
      failed.append(&mut remaining);
    }

    let success = halted.is_none()
      && failed.is_empty()
      && (kind == BatchKind::Cleaning || state.anomalies.is_empty());
    steps::teardown(ctx, &deps, &mut reservations, success).await;

    let completed = state.completed_locations.len();
    let (status, message) = match halted {
      None => {
        let message = match kind {
          BatchKind::Cleaning => format!("Completed {completed}/{total} locations"),
          BatchKind::Patrol => format!(
            "Patrol completed. {} anomalies detected.",
            state.anomalies.len()
          ),
        };
        (BatchStatus::Completed, message)
      }
      Some(Halt::Cancelled) => (
        BatchStatus::Cancelled,
        format!(
          "Cancelled after {completed}/{total} locations: {}",
          state.cancel_reason.as_deref().unwrap_or("cancelled by user")
        ),
      ),
      Some(Halt::Failed(message)) => (
        BatchStatus::Failed,
        format!("Scheduled {} failed: {message}", kind.as_str()),
      ),
    };

    let report = Notification::new(
      kind.channel(),
      format!("Scheduled {} {}: {}", kind.as_str(), status_word(status), input.schedule_name),
    )
    .with("robot_id", state.robot_id.clone())
    .with("completed", state.completed_locations.clone())
    .with("failed", failed.clone())
    .with("anomalies", state.anomalies.len());
    steps::report(ctx, &deps, report).await;

    ctx.update(|s| {
      s.status = status;
      s.current_location = None;
    });
    info!(?status, completed, failed = failed.len(), "batch_finished");

    ScheduledBatchResult {
      success,
      status,
      task_type: kind,
      schedule_name: input.schedule_name,
      robot_id: state.robot_id,
      locations_completed: state.completed_locations,
      locations_failed: failed,
      locations_remaining: remaining,
      anomalies: state.anomalies,
      message,
      total_duration_minutes: ctx.elapsed().as_secs_f64() / 60.0,
    }
  }
}

fn status_word(status: BatchStatus) -> &'static str {
  match status {
    BatchStatus::Completed => "completed",
    BatchStatus::Cancelled => "cancelled",
    _ => "failed",
  }
}
