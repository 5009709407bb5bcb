//! Marshal Dispatch
//!
//! The worker registry. Workers advertise dot-segmented capabilities
//! (`cleaning.floor.standard`, `delivery.*`); the [`Dispatcher`] matches a
//! requested capability against them, picks the least-loaded eligible worker
//! and records a [`TaskAssignment`].
//!
//! The dispatcher is the only state shared between workflow instances, so every
//! mutation happens inside a single critical section.

mod capability;
mod dispatcher;
mod error;
mod worker;

pub use capability::capability_matches;
pub use dispatcher::{Dispatcher, DispatcherStats, TaskStats, WorkerStats};
pub use error::DispatchError;
pub use worker::{AssignmentStatus, TaskAssignment, Worker, WorkerStatus};
