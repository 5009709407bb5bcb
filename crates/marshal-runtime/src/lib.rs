//! Marshal Runtime
//!
//! The contract every marshal workflow is written against, and an in-process
//! engine that executes it.
//!
//! A workflow is a state machine ([`Workflow`]) whose run timeline receives a
//! [`WorkflowContext`]. The context owns the instance state and is the only way
//! to suspend: on activities, on [`WorkflowContext::wait_condition`], or on
//! [`WorkflowContext::sleep`]. While suspended, queued signals are applied to
//! the state in arrival order, and every mutation is published so queries never
//! wait on the run timeline.
//!
//! Activities are effectful closures executed with a start-to-close timeout,
//! optional heartbeat monitoring and exponential-backoff retries.

mod activity;
mod context;
mod engine;
mod error;
mod events;
mod retry;
mod workflow;

pub use activity::{ActivityContext, ActivityOptions};
pub use context::{WaitOutcome, WorkflowContext};
pub use engine::{Engine, InstanceInfo, InstanceStatus, WorkflowHandle};
pub use error::{ActivityError, ActivityFailure, EngineError, ValidationError};
pub use events::{ChannelNotifier, NoopNotifier, TracingNotifier, WorkflowEvent, WorkflowNotifier};
pub use retry::RetryPolicy;
pub use workflow::{STATUS_QUERY, SignalOutcome, Workflow};
