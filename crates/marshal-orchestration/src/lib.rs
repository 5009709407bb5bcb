//! Marshal Orchestration
//!
//! Workflows that put robots to work in the building. Each one checks
//! preconditions, acquires a robot, prepares the route (doors, elevator, zone
//! access) in parallel, hands the robot its task, waits for it, and finally
//! tears down everything it reserved. Teardown runs on every exit path once a
//! reservation exists, cancellation included.

mod cleaning;
mod delivery;
mod deps;
mod scheduled;
mod steps;

pub use cleaning::{
  CleaningInput, CleaningMode, CleaningResult, CleaningSignal, CleaningState, CleaningStatus,
  CleaningWorkflow,
};
pub use delivery::{
  DeliveryInput, DeliveryResult, DeliverySignal, DeliveryState, DeliveryStatus, DeliveryWorkflow,
};
pub use deps::OrchestrationDeps;
pub use scheduled::{
  Anomaly, BatchKind, BatchStatus, ScheduledBatchInput, ScheduledBatchResult,
  ScheduledBatchSignal, ScheduledBatchState, ScheduledBatchWorkflow,
};
