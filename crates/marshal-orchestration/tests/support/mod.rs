#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use marshal_activities::{
  Activities, ApprovalRecord, ApprovalRequest, Channel, ElevatorTrip, FacilityActivities,
  FleetRobots, FloorCondition, FloorStatus, Notification, NotificationActivities,
  NotificationReceipt, RobotActivities, RobotLease, RobotLocation, RobotStatus, RobotTask,
  TaskCompletion, TaskReceipt, ZoneAccess, floor_of,
};
use marshal_dispatch::{Dispatcher, Worker};
use marshal_orchestration::OrchestrationDeps;
use marshal_runtime::{ActivityContext, ActivityError};
use tokio::sync::Notify;

pub const ROBOT: &str = "robot-1";
pub const WORK: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
pub struct FacilityLog {
  pub opened: Vec<String>,
  pub closed: Vec<String>,
  pub elevator_calls: Vec<(u32, u32)>,
  pub granted: Vec<String>,
  pub revoked: Vec<String>,
}

/// Building double: doors can be held shut by a gate or jam outright, and the
/// elevator can blow up.
#[derive(Default)]
pub struct TestFacility {
  floors: HashMap<String, FloorStatus>,
  gate: Option<Arc<Notify>>,
  jammed_door: Option<String>,
  exploding_elevator: bool,
  log: Mutex<FacilityLog>,
}

impl TestFacility {
  pub fn with_floor(mut self, floor_id: &str, condition: FloorCondition) -> Self {
    let mut status = FloorStatus::normal(floor_id);
    status.status = condition;
    self.floors.insert(floor_id.to_string(), status);
    self
  }

  pub fn with_occupied(mut self, floor_id: &str) -> Self {
    let mut status = FloorStatus::normal(floor_id);
    status.occupied = true;
    status.occupancy = 12;
    self.floors.insert(floor_id.to_string(), status);
    self
  }

  /// Door opens block until the gate is notified or the run is cancelled.
  pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn with_jammed_door(mut self, door_id: &str) -> Self {
    self.jammed_door = Some(door_id.to_string());
    self
  }

  /// Elevator calls panic instead of returning.
  pub fn with_exploding_elevator(mut self) -> Self {
    self.exploding_elevator = true;
    self
  }

  pub fn log(&self) -> FacilityLog {
    self.log.lock().unwrap().clone()
  }
}

#[async_trait]
impl FacilityActivities for TestFacility {
  async fn get_floor_status(
    &self,
    _ctx: &ActivityContext,
    floor_id: &str,
  ) -> Result<FloorStatus, ActivityError> {
    Ok(
      self
        .floors
        .get(floor_id)
        .cloned()
        .unwrap_or_else(|| FloorStatus::normal(floor_id)),
    )
  }

  async fn get_doors_on_route(
    &self,
    _ctx: &ActivityContext,
    _from: &str,
    to: &str,
  ) -> Result<Vec<String>, ActivityError> {
    let floor = floor_of(to);
    Ok(vec![format!("{floor}-door-01"), format!("{floor}-door-02")])
  }

  async fn open_door(
    &self,
    ctx: &ActivityContext,
    door_id: &str,
    _requester_id: &str,
    _hold_seconds: u32,
  ) -> Result<(), ActivityError> {
    if self.jammed_door.as_deref() == Some(door_id) {
      return Err(ActivityError::fatal("door jammed"));
    }
    if let Some(gate) = &self.gate {
      tokio::select! {
        _ = gate.notified() => {}
        _ = ctx.cancelled() => return Err(ActivityError::Cancelled),
      }
    }
    self.log.lock().unwrap().opened.push(door_id.to_string());
    Ok(())
  }

  async fn close_door(&self, _ctx: &ActivityContext, door_id: &str) -> Result<(), ActivityError> {
    self.log.lock().unwrap().closed.push(door_id.to_string());
    Ok(())
  }

  async fn call_elevator(
    &self,
    _ctx: &ActivityContext,
    from_floor: u32,
    to_floor: u32,
    _robot_id: &str,
  ) -> Result<ElevatorTrip, ActivityError> {
    if self.exploding_elevator {
      panic!("elevator exploded");
    }
    self
      .log
      .lock()
      .unwrap()
      .elevator_calls
      .push((from_floor, to_floor));
    Ok(ElevatorTrip {
      elevator_id: "elevator-test".to_string(),
      from_floor,
      to_floor,
      waiting_time_seconds: 0,
    })
  }

  async fn grant_zone_access(
    &self,
    _ctx: &ActivityContext,
    zone_id: &str,
    entity_id: &str,
    _duration_minutes: u32,
  ) -> Result<ZoneAccess, ActivityError> {
    self.log.lock().unwrap().granted.push(zone_id.to_string());
    Ok(ZoneAccess {
      access_id: format!("access-{zone_id}"),
      zone_id: zone_id.to_string(),
      entity_id: entity_id.to_string(),
    })
  }

  async fn revoke_zone_access(
    &self,
    _ctx: &ActivityContext,
    access_id: &str,
  ) -> Result<(), ActivityError> {
    self.log.lock().unwrap().revoked.push(access_id.to_string());
    Ok(())
  }
}

/// The dispatcher-backed fleet, counting lease releases.
pub struct CountingRobots {
  inner: FleetRobots,
  releases: AtomicU32,
}

impl CountingRobots {
  pub fn release_count(&self) -> u32 {
    self.releases.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RobotActivities for CountingRobots {
  async fn get_robot_status(
    &self,
    ctx: &ActivityContext,
    robot_id: &str,
  ) -> Result<RobotStatus, ActivityError> {
    self.inner.get_robot_status(ctx, robot_id).await
  }

  async fn acquire_robot(
    &self,
    ctx: &ActivityContext,
    capability: &str,
    robot_id: Option<&str>,
    preferred_floor: u32,
  ) -> Result<Option<RobotLease>, ActivityError> {
    self
      .inner
      .acquire_robot(ctx, capability, robot_id, preferred_floor)
      .await
  }

  async fn assign_task(
    &self,
    ctx: &ActivityContext,
    task: &RobotTask,
  ) -> Result<TaskReceipt, ActivityError> {
    self.inner.assign_task(ctx, task).await
  }

  async fn wait_for_task_completion(
    &self,
    ctx: &ActivityContext,
    task_id: &str,
  ) -> Result<TaskCompletion, ActivityError> {
    self.inner.wait_for_task_completion(ctx, task_id).await
  }

  async fn get_robot_location(
    &self,
    ctx: &ActivityContext,
    robot_id: &str,
  ) -> Result<RobotLocation, ActivityError> {
    self.inner.get_robot_location(ctx, robot_id).await
  }

  async fn release_robot(
    &self,
    ctx: &ActivityContext,
    lease: &RobotLease,
    success: bool,
  ) -> Result<(), ActivityError> {
    self.releases.fetch_add(1, Ordering::SeqCst);
    self.inner.release_robot(ctx, lease, success).await
  }
}

#[derive(Default)]
pub struct RecordingNotifications {
  notifications: Mutex<Vec<Notification>>,
  updates: Mutex<Vec<String>>,
}

impl RecordingNotifications {
  pub fn sent(&self) -> Vec<Notification> {
    self.notifications.lock().unwrap().clone()
  }

  pub fn updates(&self) -> Vec<String> {
    self.updates.lock().unwrap().clone()
  }
}

#[async_trait]
impl NotificationActivities for RecordingNotifications {
  async fn send_notification(
    &self,
    _ctx: &ActivityContext,
    notification: &Notification,
  ) -> Result<NotificationReceipt, ActivityError> {
    self.notifications.lock().unwrap().push(notification.clone());
    Ok(NotificationReceipt {
      notification_id: "notif-test".to_string(),
      sent: true,
      recipients_count: notification.recipients.len(),
    })
  }

  async fn create_approval_request(
    &self,
    _ctx: &ActivityContext,
    _request: &ApprovalRequest,
  ) -> Result<ApprovalRecord, ActivityError> {
    Err(ActivityError::fatal("approvals are not used here"))
  }

  async fn send_approval_reminder(
    &self,
    _ctx: &ActivityContext,
    _approval_id: &str,
    _approvers: &[String],
    _message: &str,
  ) -> Result<(), ActivityError> {
    Ok(())
  }

  async fn send_task_update(
    &self,
    _ctx: &ActivityContext,
    _channel: Channel,
    message: &str,
  ) -> Result<(), ActivityError> {
    self.updates.lock().unwrap().push(message.to_string());
    Ok(())
  }
}

/// One robot able to clean, deliver and patrol, one task at a time.
pub struct Fixture {
  pub dispatcher: Arc<Dispatcher>,
  pub facility: Arc<TestFacility>,
  pub robots: Arc<CountingRobots>,
  pub notifications: Arc<RecordingNotifications>,
}

impl Fixture {
  pub fn new(facility: TestFacility) -> Self {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher
      .register(Worker::new(
        ROBOT,
        "robot",
        ["cleaning.*", "delivery.*", "patrol.*"],
        1,
      ))
      .unwrap();
    let robots = CountingRobots {
      inner: FleetRobots::new(dispatcher.clone()).with_work_duration(WORK),
      releases: AtomicU32::new(0),
    };

    Self {
      dispatcher,
      facility: Arc::new(facility),
      robots: Arc::new(robots),
      notifications: Arc::new(RecordingNotifications::default()),
    }
  }

  pub fn deps(&self) -> OrchestrationDeps {
    let facility: Arc<dyn FacilityActivities> = self.facility.clone();
    let robots: Arc<dyn RobotActivities> = self.robots.clone();
    let notifications: Arc<dyn NotificationActivities> = self.notifications.clone();
    OrchestrationDeps::new(Activities {
      facility,
      robots,
      notifications,
    })
  }

  pub fn robot_load(&self) -> u32 {
    self.dispatcher.get_worker(ROBOT).unwrap().current_load
  }
}
