//! Phases shared by the orchestration workflows.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{OptionFuture, join_all};
use marshal_activities::calls;
use marshal_activities::{
  Channel, FloorStatus, Notification, RobotLease, RobotLocation, RobotState, RobotTask,
  TaskCompletion, TaskReceipt, ZoneAccess, floor_number,
};
use marshal_runtime::{ActivityFailure, Workflow, WorkflowContext};
use tracing::{error, info, warn};

use crate::deps::OrchestrationDeps;

/// Where robots wait between tasks.
pub(crate) const STATION: &str = "robot-station";
pub(crate) const STATION_FLOOR: u32 = 1;

const DOOR_HOLD_SECONDS: u32 = 60;

pub(crate) fn default_priority() -> u8 {
  3
}

/// Why a run stopped before finishing its work.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Halt {
  Cancelled,
  Failed(String),
}

impl From<ActivityFailure> for Halt {
  fn from(failure: ActivityFailure) -> Self {
    if failure.is_cancelled() {
      Halt::Cancelled
    } else {
      Halt::Failed(failure.to_string())
    }
  }
}

/// Everything a run holds that teardown must give back.
#[derive(Debug, Default)]
pub(crate) struct Reservations {
  pub lease: Option<RobotLease>,
  pub doors: Vec<String>,
  pub zone: Option<ZoneAccess>,
}

/// One leg of robot travel.
pub(crate) struct Route<'a> {
  pub robot_id: &'a str,
  pub from: &'a str,
  pub from_floor: u32,
  pub to: &'a str,
  /// Zone to unlock at the destination and for how many minutes.
  pub zone: Option<(String, u32)>,
}

/// Phase boundary: stop here if the instance was cancelled.
pub(crate) fn checkpoint<W: Workflow>(ctx: &WorkflowContext<W>) -> Result<(), Halt> {
  if ctx.is_cancelled() {
    Err(Halt::Cancelled)
  } else {
    Ok(())
  }
}

/// Run `body`, turning a panic into a failure so teardown still happens.
pub(crate) async fn guarded<T>(body: impl Future<Output = Result<T, Halt>>) -> Result<T, Halt> {
  match AssertUnwindSafe(body).catch_unwind().await {
    Ok(outcome) => outcome,
    Err(panic) => {
      let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
      error!(error = %message, "workflow_body_panicked");
      Err(Halt::Failed(format!("Unexpected failure: {message}")))
    }
  }
}

pub(crate) async fn floor_status<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  floor_id: &str,
) -> Result<FloorStatus, Halt> {
  let facility = deps.activities.facility.clone();
  let floor_id = floor_id.to_string();
  let status = ctx
    .execute_activity("get_floor_status", &deps.policies.short, move |actx| {
      let facility = facility.clone();
      let floor_id = floor_id.clone();
      async move { facility.get_floor_status(&actx, &floor_id).await }
    })
    .await?;
  Ok(status)
}

pub(crate) async fn robot_location<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  robot_id: &str,
) -> Result<RobotLocation, Halt> {
  let robots = deps.activities.robots.clone();
  let robot_id = robot_id.to_string();
  let location = ctx
    .execute_activity("get_robot_location", &deps.policies.short, move |actx| {
      let robots = robots.clone();
      let robot_id = robot_id.clone();
      async move { robots.get_robot_location(&actx, &robot_id).await }
    })
    .await?;
  Ok(location)
}

/// Lease a robot for `capability`. A named robot must report ready first.
pub(crate) async fn acquire_robot<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  capability: &str,
  robot_id: Option<&str>,
  preferred_floor: u32,
) -> Result<RobotLease, Halt> {
  let robots = deps.activities.robots.clone();

  if let Some(id) = robot_id {
    let (robots, id) = (robots.clone(), id.to_string());
    let status = ctx
      .execute_activity("get_robot_status", &deps.policies.short, move |actx| {
        let robots = robots.clone();
        let id = id.clone();
        async move { robots.get_robot_status(&actx, &id).await }
      })
      .await?;
    if status.status != RobotState::Ready {
      return Err(Halt::Failed(format!(
        "Robot {} is not ready: {}",
        status.robot_id, status.status
      )));
    }
  }

  let requested = robot_id.map(str::to_string);
  let wanted = capability.to_string();
  let lease = ctx
    .execute_activity("acquire_robot", &deps.policies.short, move |actx| {
      let robots = robots.clone();
      let requested = requested.clone();
      let wanted = wanted.clone();
      async move {
        robots
          .acquire_robot(&actx, &wanted, requested.as_deref(), preferred_floor)
          .await
      }
    })
    .await?;

  match (lease, robot_id) {
    (Some(lease), _) => {
      info!(robot_id = %lease.robot_id, lease_id = %lease.lease_id, capability = %capability, "robot_acquired");
      Ok(lease)
    }
    (None, Some(id)) => Err(Halt::Failed(format!("Robot {id} cannot take {capability}"))),
    (None, None) => Err(Halt::Failed("No available robot found".to_string())),
  }
}

pub(crate) async fn assign_task<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  task: RobotTask,
) -> Result<TaskReceipt, Halt> {
  let robots = deps.activities.robots.clone();
  let receipt = ctx
    .execute_activity("assign_task", &deps.policies.assign, move |actx| {
      let robots = robots.clone();
      let task = task.clone();
      async move { robots.assign_task(&actx, &task).await }
    })
    .await?;
  Ok(receipt)
}

/// Wait for the robot to report back, bounded by the execution timeout on
/// top of the activity's own per-attempt limits.
pub(crate) async fn await_completion<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  task_id: &str,
) -> Result<TaskCompletion, Halt> {
  let robots = deps.activities.robots.clone();
  let id = task_id.to_string();
  let wait = ctx.activity("wait_for_task_completion", &deps.policies.completion, move |actx| {
    let robots = robots.clone();
    let id = id.clone();
    async move { robots.wait_for_task_completion(&actx, &id).await }
  });

  let limit = deps.policies.execution_timeout;
  match ctx.suspend(tokio::time::timeout(limit, wait)).await {
    Ok(completion) => Ok(completion?),
    Err(_) => {
      warn!(task_id = %task_id, limit_secs = limit.as_secs(), "task_execution_timed_out");
      Err(Halt::Failed(format!(
        "Task {task_id} did not finish within {}",
        describe_limit(limit)
      )))
    }
  }
}

/// Whole minutes, rounded up, or seconds for limits under a minute.
fn describe_limit(limit: Duration) -> String {
  let secs = limit.as_secs();
  match (secs, secs.div_ceil(60)) {
    (1, _) => "1 second".to_string(),
    (0..60, _) => format!("{secs} seconds"),
    (_, 1) => "1 minute".to_string(),
    (_, minutes) => format!("{minutes} minutes"),
  }
}

/// Open the doors on the route, call the elevator when the floor changes and
/// unlock the destination zone, all at once. Whatever succeeded is recorded
/// in `reservations` even when another part failed.
pub(crate) async fn prepare_route<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  reservations: &mut Reservations,
  route: Route<'_>,
) -> Result<(), Halt> {
  let facility = deps.activities.facility.clone();
  let doors = {
    let facility = facility.clone();
    let (from, to) = (route.from.to_string(), route.to.to_string());
    ctx
      .execute_activity("get_doors_on_route", &deps.policies.short, move |actx| {
        let facility = facility.clone();
        let (from, to) = (from.clone(), to.clone());
        async move { facility.get_doors_on_route(&actx, &from, &to).await }
      })
      .await?
  };
  checkpoint(ctx)?;

  let robot_id = route.robot_id.to_string();
  let door_opens: Vec<_> = doors
    .into_iter()
    .map(|door_id| {
      let (facility, robot_id, id) = (facility.clone(), robot_id.clone(), door_id.clone());
      ctx
        .activity("open_door", &deps.policies.short, move |actx| {
          let facility = facility.clone();
          let (door_id, robot_id) = (id.clone(), robot_id.clone());
          async move {
            facility
              .open_door(&actx, &door_id, &robot_id, DOOR_HOLD_SECONDS)
              .await
          }
        })
        .map(move |opened| (door_id, opened))
    })
    .collect();

  let from_floor = route.from_floor;
  let to_floor = floor_number(route.to);
  let elevator = (from_floor != to_floor).then(|| {
    let (facility, robot_id) = (facility.clone(), robot_id.clone());
    ctx.activity("call_elevator", &deps.policies.elevator, move |actx| {
      let facility = facility.clone();
      let robot_id = robot_id.clone();
      async move {
        facility
          .call_elevator(&actx, from_floor, to_floor, &robot_id)
          .await
      }
    })
  });

  let zone = route.zone.map(|(zone_id, minutes)| {
    let (facility, robot_id) = (facility.clone(), robot_id.clone());
    ctx.activity("grant_zone_access", &deps.policies.short, move |actx| {
      let facility = facility.clone();
      let (zone_id, robot_id) = (zone_id.clone(), robot_id.clone());
      async move {
        facility
          .grant_zone_access(&actx, &zone_id, &robot_id, minutes)
          .await
      }
    })
  });

  let (opened, elevator, zone) = ctx
    .suspend(async move {
      tokio::join!(
        join_all(door_opens),
        OptionFuture::from(elevator),
        OptionFuture::from(zone),
      )
    })
    .await;

  let mut failure = None;
  for (door_id, outcome) in opened {
    match outcome {
      Ok(()) => reservations.doors.push(door_id),
      Err(e) => {
        warn!(door_id = %door_id, error = %e, "door_open_failed");
        failure.get_or_insert(Halt::from(e));
      }
    }
  }
  if let Some(Err(e)) = elevator {
    warn!(robot_id = %robot_id, error = %e, "elevator_call_failed");
    failure.get_or_insert(Halt::from(e));
  }
  match zone {
    Some(Ok(access)) => reservations.zone = Some(access),
    Some(Err(e)) => {
      warn!(robot_id = %robot_id, error = %e, "zone_access_failed");
      failure.get_or_insert(Halt::from(e));
    }
    None => {}
  }

  checkpoint(ctx)?;
  match failure {
    Some(halt) => Err(halt),
    None => {
      info!(robot_id = %robot_id, to = %route.to, doors = reservations.doors.len(), "route_prepared");
      Ok(())
    }
  }
}

/// Close opened doors and revoke zone access. Failures are logged.
pub(crate) async fn release_access<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  reservations: &mut Reservations,
) {
  for door_id in std::mem::take(&mut reservations.doors) {
    let facility = deps.activities.facility.clone();
    let id = door_id.clone();
    let closed = ctx
      .cleanup_activity("close_door", &deps.policies.short, move |actx| {
        let facility = facility.clone();
        let id = id.clone();
        async move { facility.close_door(&actx, &id).await }
      })
      .await;
    if let Err(e) = closed {
      warn!(door_id = %door_id, error = %e, "door_close_failed");
    }
  }

  if let Some(access) = reservations.zone.take() {
    let facility = deps.activities.facility.clone();
    let access_id = access.access_id.clone();
    let revoked = ctx
      .cleanup_activity("revoke_zone_access", &deps.policies.short, move |actx| {
        let facility = facility.clone();
        let access_id = access_id.clone();
        async move { facility.revoke_zone_access(&actx, &access_id).await }
      })
      .await;
    if let Err(e) = revoked {
      warn!(access_id = %access.access_id, error = %e, "zone_revoke_failed");
    }
  }
}

/// Give back everything still held. Each reservation is released once.
pub(crate) async fn teardown<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  reservations: &mut Reservations,
  success: bool,
) {
  if let Some(lease) = reservations.lease.take() {
    let robots = deps.activities.robots.clone();
    let held = lease.clone();
    let released = ctx
      .cleanup_activity("release_robot", &deps.policies.short, move |actx| {
        let robots = robots.clone();
        let lease = held.clone();
        async move { robots.release_robot(&actx, &lease, success).await }
      })
      .await;
    if let Err(e) = released {
      error!(robot_id = %lease.robot_id, lease_id = %lease.lease_id, error = %e, "robot_release_failed");
    }
  }

  release_access(ctx, deps, reservations).await;
}

/// Best-effort message while the run is in progress.
pub(crate) async fn announce<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  notification: Notification,
) {
  let sent = calls::send_notification(
    ctx,
    &deps.activities.notifications,
    &deps.policies.short,
    notification,
  )
  .await;
  if let Err(e) = sent {
    warn!(error = %e, "notification_failed");
  }
}

pub(crate) async fn task_update<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  channel: Channel,
  message: String,
) {
  let sent = calls::send_task_update(
    ctx,
    &deps.activities.notifications,
    &deps.policies.short,
    channel,
    message,
  )
  .await;
  if let Err(e) = sent {
    warn!(error = %e, "task_update_failed");
  }
}

/// Final summary, sent after teardown whatever the outcome.
pub(crate) async fn report<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  deps: &OrchestrationDeps,
  notification: Notification,
) {
  let notifications = deps.activities.notifications.clone();
  let sent = ctx
    .cleanup_activity("send_notification", &deps.policies.short, move |actx| {
      let notifications = notifications.clone();
      let notification = notification.clone();
      async move { notifications.send_notification(&actx, &notification).await }
    })
    .await;
  if let Err(e) = sent {
    warn!(error = %e, "report_failed");
  }
}
