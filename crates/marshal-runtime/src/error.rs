use std::time::Duration;

use thiserror::Error;

/// Failure of a single activity attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
  /// Retried according to the activity's policy.
  #[error("{0}")]
  Transient(String),

  /// Not retried.
  #[error("{0}")]
  Fatal(String),

  #[error("timed out after {0:?}")]
  Timeout(Duration),

  #[error("no heartbeat within {0:?}")]
  HeartbeatTimeout(Duration),

  #[error("cancelled")]
  Cancelled,
}

impl ActivityError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self::Transient(message.into())
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    Self::Fatal(message.into())
  }

  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::Transient(_) | Self::Timeout(_) | Self::HeartbeatTimeout(_)
    )
  }
}

/// An activity that failed terminally: a non-retryable error, or retries exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("activity '{activity}' failed after {attempts} attempt(s): {source}")]
pub struct ActivityFailure {
  pub activity: String,
  pub attempts: u32,
  #[source]
  pub source: ActivityError,
}

impl ActivityFailure {
  pub fn is_cancelled(&self) -> bool {
    matches!(self.source, ActivityError::Cancelled)
  }
}

/// Workflow input rejected before an instance was created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
  pub field: String,
  pub message: String,
}

impl ValidationError {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
    }
  }
}

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("workflow instance already exists: {instance_id}")]
  AlreadyExists { instance_id: String },

  #[error("workflow instance not found: {instance_id}")]
  NotFound { instance_id: String },

  #[error("workflow instance is still running: {instance_id}")]
  StillRunning { instance_id: String },

  #[error("instance '{instance_id}' is a {actual} workflow, not {expected}")]
  TypeMismatch {
    instance_id: String,
    expected: &'static str,
    actual: &'static str,
  },

  #[error("unknown query '{query}'")]
  UnknownQuery { query: String },

  #[error("invalid signal for '{instance_id}': {message}")]
  InvalidSignal { instance_id: String, message: String },

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("workflow instance '{instance_id}' crashed: {message}")]
  Crashed { instance_id: String, message: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
