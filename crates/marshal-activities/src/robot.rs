use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marshal_dispatch::{AssignmentStatus, DispatchError, Dispatcher, Worker, WorkerStatus};
use marshal_runtime::{ActivityContext, ActivityError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const ROBOT_TYPE: &str = "robot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotState {
  Ready,
  Busy,
  Charging,
  Offline,
}

impl std::fmt::Display for RobotState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RobotState::Ready => "ready",
      RobotState::Busy => "busy",
      RobotState::Charging => "charging",
      RobotState::Offline => "offline",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
  pub robot_id: String,
  pub status: RobotState,
  pub battery_level: u8,
  pub current_floor: u32,
  pub current_task: Option<String>,
}

/// A reserved unit of a robot's capacity. Must be released exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotLease {
  pub robot_id: String,
  pub lease_id: String,
  pub capability: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotTask {
  pub robot_id: String,
  pub lease_id: String,
  /// `cleaning`, `delivery` or `patrol`.
  pub task_type: String,
  pub parameters: serde_json::Value,
  pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
  Assigned,
  Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReceipt {
  pub task_id: String,
  pub status: ReceiptStatus,
  pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
  Completed,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
  pub task_id: String,
  pub status: CompletionStatus,
  pub duration_minutes: u32,
  pub area_cleaned_sqm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotLocation {
  pub robot_id: String,
  pub floor: u32,
  pub zone: String,
}

/// The robot fleet.
#[async_trait]
pub trait RobotActivities: Send + Sync {
  async fn get_robot_status(
    &self,
    ctx: &ActivityContext,
    robot_id: &str,
  ) -> Result<RobotStatus, ActivityError>;

  /// Reserve a robot for `capability`: the named one, or the best match.
  /// `None` when nothing can take the work.
  async fn acquire_robot(
    &self,
    ctx: &ActivityContext,
    capability: &str,
    robot_id: Option<&str>,
    preferred_floor: u32,
  ) -> Result<Option<RobotLease>, ActivityError>;

  async fn assign_task(
    &self,
    ctx: &ActivityContext,
    task: &RobotTask,
  ) -> Result<TaskReceipt, ActivityError>;

  /// Long-running. Heartbeats while the robot works and returns
  /// [`ActivityError::Cancelled`] once the owning workflow is cancelled.
  async fn wait_for_task_completion(
    &self,
    ctx: &ActivityContext,
    task_id: &str,
  ) -> Result<TaskCompletion, ActivityError>;

  async fn get_robot_location(
    &self,
    ctx: &ActivityContext,
    robot_id: &str,
  ) -> Result<RobotLocation, ActivityError>;

  /// Return a lease. Releasing twice is a no-op.
  async fn release_robot(
    &self,
    ctx: &ActivityContext,
    lease: &RobotLease,
    success: bool,
  ) -> Result<(), ActivityError>;
}

fn worker_floor(worker: &Worker) -> u32 {
  worker
    .metadata
    .get("floor")
    .and_then(serde_json::Value::as_u64)
    .and_then(|f| u32::try_from(f).ok())
    .unwrap_or(1)
}

/// Robots backed by the shared [`Dispatcher`]: a lease is a dispatcher
/// assignment, so capacity is reserved while a workflow holds the robot.
/// Work itself is simulated.
pub struct FleetRobots {
  dispatcher: Arc<Dispatcher>,
  work_duration: Duration,
  heartbeat_interval: Duration,
}

impl FleetRobots {
  pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
    Self {
      dispatcher,
      work_duration: Duration::from_secs(2),
      heartbeat_interval: Duration::from_millis(500),
    }
  }

  /// How long simulated tasks take.
  pub fn with_work_duration(mut self, duration: Duration) -> Self {
    self.work_duration = duration;
    self
  }

  fn worker(&self, robot_id: &str) -> Result<Worker, ActivityError> {
    self
      .dispatcher
      .get_worker(robot_id)
      .ok_or_else(|| ActivityError::fatal(format!("unknown robot '{robot_id}'")))
  }
}

#[async_trait]
impl RobotActivities for FleetRobots {
  async fn get_robot_status(
    &self,
    _ctx: &ActivityContext,
    robot_id: &str,
  ) -> Result<RobotStatus, ActivityError> {
    let worker = self.worker(robot_id)?;
    let status = match worker.status {
      WorkerStatus::Offline => RobotState::Offline,
      WorkerStatus::Busy => RobotState::Busy,
      WorkerStatus::Ready if !worker.has_capacity() => RobotState::Busy,
      WorkerStatus::Ready => RobotState::Ready,
    };
    let battery_level = worker
      .metadata
      .get("battery_level")
      .and_then(serde_json::Value::as_u64)
      .map_or(100, |b| b.min(100) as u8);

    Ok(RobotStatus {
      robot_id: worker.worker_id.clone(),
      status,
      battery_level,
      current_floor: worker_floor(&worker),
      current_task: self
        .dispatcher
        .worker_tasks(robot_id)
        .into_iter()
        .next()
        .map(|t| t.task_id),
    })
  }

  async fn acquire_robot(
    &self,
    _ctx: &ActivityContext,
    capability: &str,
    robot_id: Option<&str>,
    preferred_floor: u32,
  ) -> Result<Option<RobotLease>, ActivityError> {
    let params = json!({ "preferred_floor": preferred_floor });
    let result = match robot_id {
      Some(id) => self.dispatcher.dispatch_to(id, capability, params),
      None => {
        let nearby = self
          .dispatcher
          .find_available(capability, Some(ROBOT_TYPE))
          .into_iter()
          .find(|w| worker_floor(w) == preferred_floor)
          .map(|w| w.worker_id);
        self
          .dispatcher
          .dispatch(capability, params, Some(ROBOT_TYPE), nearby.as_deref())
      }
    };

    match result {
      Ok(assignment) => Ok(Some(RobotLease {
        robot_id: assignment.worker_id,
        lease_id: assignment.task_id,
        capability: capability.to_string(),
      })),
      Err(
        e @ (DispatchError::NoAvailableWorker { .. }
        | DispatchError::WorkerUnavailable { .. }
        | DispatchError::WorkerNotFound { .. }),
      ) => {
        warn!(capability = %capability, error = %e, "robot_unavailable");
        Ok(None)
      }
      Err(e) => Err(ActivityError::fatal(e.to_string())),
    }
  }

  async fn assign_task(
    &self,
    _ctx: &ActivityContext,
    task: &RobotTask,
  ) -> Result<TaskReceipt, ActivityError> {
    let rejected = |reason: &str| TaskReceipt {
      task_id: task.lease_id.clone(),
      status: ReceiptStatus::Rejected,
      reason: Some(reason.to_string()),
    };

    let Some(lease) = self.dispatcher.get_assignment(&task.lease_id) else {
      return Ok(rejected("unknown lease"));
    };
    if lease.worker_id != task.robot_id {
      return Ok(rejected("lease belongs to another robot"));
    }
    if lease.status != AssignmentStatus::Assigned {
      return Ok(rejected("lease already released"));
    }

    info!(
      task_id = %task.lease_id,
      robot_id = %task.robot_id,
      task_type = %task.task_type,
      priority = task.priority,
      "task_assigned"
    );
    Ok(TaskReceipt {
      task_id: task.lease_id.clone(),
      status: ReceiptStatus::Assigned,
      reason: None,
    })
  }

  async fn wait_for_task_completion(
    &self,
    ctx: &ActivityContext,
    task_id: &str,
  ) -> Result<TaskCompletion, ActivityError> {
    let assignment = self
      .dispatcher
      .get_assignment(task_id)
      .ok_or_else(|| ActivityError::fatal(format!("unknown task '{task_id}'")))?;
    if assignment.status == AssignmentStatus::Failed {
      return Ok(TaskCompletion {
        task_id: task_id.to_string(),
        status: CompletionStatus::Failed,
        duration_minutes: 0,
        area_cleaned_sqm: 0.0,
      });
    }

    let mut remaining = self.work_duration;
    while !remaining.is_zero() {
      ctx.heartbeat();
      let step = self.heartbeat_interval.min(remaining);
      tokio::select! {
        _ = tokio::time::sleep(step) => {}
        _ = ctx.cancelled() => return Err(ActivityError::Cancelled),
      }
      remaining -= step;
    }
    ctx.heartbeat();

    info!(task_id = %task_id, "task_finished");
    Ok(TaskCompletion {
      task_id: task_id.to_string(),
      status: CompletionStatus::Completed,
      duration_minutes: 30,
      area_cleaned_sqm: 150.0,
    })
  }

  async fn get_robot_location(
    &self,
    _ctx: &ActivityContext,
    robot_id: &str,
  ) -> Result<RobotLocation, ActivityError> {
    let worker = self.worker(robot_id)?;
    Ok(RobotLocation {
      robot_id: worker.worker_id.clone(),
      floor: worker_floor(&worker),
      zone: "station".to_string(),
    })
  }

  async fn release_robot(
    &self,
    _ctx: &ActivityContext,
    lease: &RobotLease,
    success: bool,
  ) -> Result<(), ActivityError> {
    match self.dispatcher.complete(&lease.lease_id, success) {
      Some(_) => info!(robot_id = %lease.robot_id, lease_id = %lease.lease_id, success, "robot_released"),
      None => info!(lease_id = %lease.lease_id, "robot_release_repeated"),
    }
    Ok(())
  }
}
