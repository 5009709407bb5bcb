//! Marshal Activities
//!
//! The effectful operations workflows invoke: facility control (floors, doors,
//! elevators, zone access), the robot fleet, and notifications. Each concern is
//! an async trait so workflows can run against the in-process implementations
//! here or against test doubles.
//!
//! Callers must assume at-least-once execution; every operation here is safe
//! to repeat.

mod bundle;
pub mod calls;
mod facility;
mod location;
mod notification;
mod robot;

pub use bundle::{Activities, ActivityPolicies};
pub use facility::{
  ElevatorTrip, FacilityActivities, FloorCondition, FloorStatus, SimulatedFacility, ZoneAccess,
};
pub use location::{floor_number, floor_of};
pub use notification::{
  ApprovalRecord, ApprovalRequest, Channel, LogNotifications, Notification,
  NotificationActivities, NotificationReceipt,
};
pub use robot::{
  CompletionStatus, FleetRobots, ReceiptStatus, RobotActivities, RobotLease, RobotLocation,
  RobotState, RobotStatus, RobotTask, TaskCompletion, TaskReceipt,
};
