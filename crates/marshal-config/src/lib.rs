//! Marshal Config
//!
//! Serializable configuration for the marshal orchestrator. These are plain
//! definitions: durations are stored as milliseconds or hours, and the crates
//! that consume them convert into their runtime representations.
//!
//! Configuration is loaded from a JSON file. Every field has a default, so an
//! empty object (`{}`) is a valid configuration.

mod activity;
mod error;
mod fleet;
mod orchestrator;

pub use activity::{ActivityConfig, RetryPolicyDef};
pub use error::ConfigError;
pub use fleet::{FleetConfig, WorkerDef};
pub use orchestrator::{ApprovalConfig, DeliveryConfig, OrchestratorConfig};
