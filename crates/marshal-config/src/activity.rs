use serde::{Deserialize, Serialize};

/// Exponential backoff settings for activity retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyDef {
  /// Delay before the first retry, in milliseconds.
  pub initial_interval_ms: u64,
  /// Multiplier applied to the delay after every failed attempt.
  pub backoff_coefficient: f64,
  /// Upper bound for the delay between attempts, in milliseconds.
  pub maximum_interval_ms: u64,
  /// Total attempts including the first one.
  pub maximum_attempts: u32,
}

impl Default for RetryPolicyDef {
  fn default() -> Self {
    Self {
      initial_interval_ms: 1_000,
      backoff_coefficient: 2.0,
      maximum_interval_ms: 60_000,
      maximum_attempts: 3,
    }
  }
}

/// Timeouts and retry settings for the activity boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
  pub retry: RetryPolicyDef,
  /// Start-to-close timeout for short facility/robot/notification calls.
  pub short_timeout_ms: u64,
  /// Start-to-close timeout for elevator calls.
  pub elevator_timeout_ms: u64,
  /// Start-to-close timeout for handing a task to a robot.
  pub assign_timeout_ms: u64,
  /// Start-to-close timeout for one attempt of waiting on task completion.
  pub completion_timeout_ms: u64,
  /// Maximum silence between heartbeats of a long-running activity.
  pub heartbeat_timeout_ms: u64,
  /// Overall execution deadline for a single robot task, independent of retries.
  pub execution_timeout_ms: u64,
}

impl Default for ActivityConfig {
  fn default() -> Self {
    Self {
      retry: RetryPolicyDef::default(),
      short_timeout_ms: 30_000,
      elevator_timeout_ms: 5 * 60_000,
      assign_timeout_ms: 60_000,
      completion_timeout_ms: 2 * 60 * 60_000,
      heartbeat_timeout_ms: 60_000,
      execution_timeout_ms: 60 * 60_000,
    }
  }
}
