use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use marshal_runtime::{ActivityContext, ActivityError};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorCondition {
  Normal,
  Maintenance,
  Emergency,
}

impl std::fmt::Display for FloorCondition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      FloorCondition::Normal => "normal",
      FloorCondition::Maintenance => "maintenance",
      FloorCondition::Emergency => "emergency",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorStatus {
  pub floor_id: String,
  pub status: FloorCondition,
  pub occupancy: u32,
  /// Occupied areas are skipped by scheduled work.
  pub occupied: bool,
}

impl FloorStatus {
  pub fn normal(floor_id: impl Into<String>) -> Self {
    Self {
      floor_id: floor_id.into(),
      status: FloorCondition::Normal,
      occupancy: 0,
      occupied: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevatorTrip {
  pub elevator_id: String,
  pub from_floor: u32,
  pub to_floor: u32,
  pub waiting_time_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAccess {
  pub access_id: String,
  pub zone_id: String,
  pub entity_id: String,
}

/// Building management: floors, doors, elevators and zone access.
#[async_trait]
pub trait FacilityActivities: Send + Sync {
  async fn get_floor_status(
    &self,
    ctx: &ActivityContext,
    floor_id: &str,
  ) -> Result<FloorStatus, ActivityError>;

  /// Doors a robot passes between two locations.
  async fn get_doors_on_route(
    &self,
    ctx: &ActivityContext,
    from: &str,
    to: &str,
  ) -> Result<Vec<String>, ActivityError>;

  async fn open_door(
    &self,
    ctx: &ActivityContext,
    door_id: &str,
    requester_id: &str,
    hold_seconds: u32,
  ) -> Result<(), ActivityError>;

  async fn close_door(&self, ctx: &ActivityContext, door_id: &str) -> Result<(), ActivityError>;

  async fn call_elevator(
    &self,
    ctx: &ActivityContext,
    from_floor: u32,
    to_floor: u32,
    robot_id: &str,
  ) -> Result<ElevatorTrip, ActivityError>;

  async fn grant_zone_access(
    &self,
    ctx: &ActivityContext,
    zone_id: &str,
    entity_id: &str,
    duration_minutes: u32,
  ) -> Result<ZoneAccess, ActivityError>;

  async fn revoke_zone_access(
    &self,
    ctx: &ActivityContext,
    access_id: &str,
  ) -> Result<(), ActivityError>;
}

#[derive(Debug, Default)]
struct FacilityState {
  floors: HashMap<String, FloorStatus>,
  open_doors: BTreeSet<String>,
  grants: HashMap<String, ZoneAccess>,
}

/// In-memory building. Floors are normal and empty unless overridden.
#[derive(Debug, Default)]
pub struct SimulatedFacility {
  state: Mutex<FacilityState>,
}

impl SimulatedFacility {
  pub fn new() -> Self {
    Self::default()
  }

  /// Override the reported status of a floor or location.
  pub fn with_floor(self, status: FloorStatus) -> Self {
    self
      .lock()
      .floors
      .insert(status.floor_id.clone(), status);
    self
  }

  fn lock(&self) -> MutexGuard<'_, FacilityState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Doors currently held open, sorted.
  pub fn open_doors(&self) -> Vec<String> {
    self.lock().open_doors.iter().cloned().collect()
  }

  pub fn active_grants(&self) -> Vec<ZoneAccess> {
    let mut grants: Vec<_> = self.lock().grants.values().cloned().collect();
    grants.sort_by(|a, b| a.access_id.cmp(&b.access_id));
    grants
  }
}

#[async_trait]
impl FacilityActivities for SimulatedFacility {
  async fn get_floor_status(
    &self,
    _ctx: &ActivityContext,
    floor_id: &str,
  ) -> Result<FloorStatus, ActivityError> {
    let status = self
      .lock()
      .floors
      .get(floor_id)
      .cloned()
      .unwrap_or_else(|| FloorStatus::normal(floor_id));
    info!(floor_id = %floor_id, status = %status.status, "floor_status");
    Ok(status)
  }

  async fn get_doors_on_route(
    &self,
    _ctx: &ActivityContext,
    from: &str,
    to: &str,
  ) -> Result<Vec<String>, ActivityError> {
    let floor = crate::floor_of(to);
    let doors = vec![format!("{floor}-door-01"), format!("{floor}-door-02")];
    info!(from = %from, to = %to, doors = doors.len(), "route_doors");
    Ok(doors)
  }

  async fn open_door(
    &self,
    _ctx: &ActivityContext,
    door_id: &str,
    requester_id: &str,
    hold_seconds: u32,
  ) -> Result<(), ActivityError> {
    info!(door_id = %door_id, requester_id = %requester_id, hold_seconds, "door_opened");
    self.lock().open_doors.insert(door_id.to_string());
    Ok(())
  }

  async fn close_door(&self, _ctx: &ActivityContext, door_id: &str) -> Result<(), ActivityError> {
    info!(door_id = %door_id, "door_closed");
    self.lock().open_doors.remove(door_id);
    Ok(())
  }

  async fn call_elevator(
    &self,
    _ctx: &ActivityContext,
    from_floor: u32,
    to_floor: u32,
    robot_id: &str,
  ) -> Result<ElevatorTrip, ActivityError> {
    info!(from_floor, to_floor, robot_id = %robot_id, "elevator_called");
    Ok(ElevatorTrip {
      elevator_id: "elevator-001".to_string(),
      from_floor,
      to_floor,
      waiting_time_seconds: 30,
    })
  }

  async fn grant_zone_access(
    &self,
    _ctx: &ActivityContext,
    zone_id: &str,
    entity_id: &str,
    duration_minutes: u32,
  ) -> Result<ZoneAccess, ActivityError> {
    // every grant is distinct so revoking one never drops a concurrent one
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let access = ZoneAccess {
      access_id: format!("access-{zone_id}-{entity_id}-{}", &suffix[..8]),
      zone_id: zone_id.to_string(),
      entity_id: entity_id.to_string(),
    };
    info!(access_id = %access.access_id, duration_minutes, "zone_access_granted");
    self
      .lock()
      .grants
      .insert(access.access_id.clone(), access.clone());
    Ok(access)
  }

  async fn revoke_zone_access(
    &self,
    _ctx: &ActivityContext,
    access_id: &str,
  ) -> Result<(), ActivityError> {
    info!(access_id = %access_id, "zone_access_revoked");
    self.lock().grants.remove(access_id);
    Ok(())
  }
}
