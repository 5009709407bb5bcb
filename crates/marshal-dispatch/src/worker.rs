use chrono::{DateTime, Utc};
use marshal_config::WorkerDef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
  Ready,
  Busy,
  Offline,
}

impl std::fmt::Display for WorkerStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      WorkerStatus::Ready => "ready",
      WorkerStatus::Busy => "busy",
      WorkerStatus::Offline => "offline",
    };
    f.write_str(s)
  }
}

/// A robot, facility controller or any other executor that can take tasks.
///
/// `status` changes only through [`Dispatcher::update_status`](crate::Dispatcher::update_status);
/// it is never derived from load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
  pub worker_id: String,
  pub worker_type: String,
  pub capabilities: Vec<String>,
  pub status: WorkerStatus,
  pub current_load: u32,
  pub max_load: u32,
  #[serde(default)]
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Worker {
  /// A ready, idle worker.
  pub fn new(
    worker_id: impl Into<String>,
    worker_type: impl Into<String>,
    capabilities: impl IntoIterator<Item = impl Into<String>>,
    max_load: u32,
  ) -> Self {
    Self {
      worker_id: worker_id.into(),
      worker_type: worker_type.into(),
      capabilities: capabilities.into_iter().map(Into::into).collect(),
      status: WorkerStatus::Ready,
      current_load: 0,
      max_load,
      metadata: serde_json::Map::new(),
    }
  }

  pub fn has_capacity(&self) -> bool {
    self.current_load < self.max_load
  }

  pub fn can_handle(&self, capability: &str) -> bool {
    self
      .capabilities
      .iter()
      .any(|pattern| crate::capability_matches(pattern, capability))
  }
}

impl From<WorkerDef> for Worker {
  fn from(def: WorkerDef) -> Self {
    Self {
      worker_id: def.worker_id,
      worker_type: def.worker_type,
      capabilities: def.capabilities,
      status: WorkerStatus::Ready,
      current_load: 0,
      max_load: def.max_load,
      metadata: def.metadata,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
  Assigned,
  Completed,
  Failed,
}

impl AssignmentStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, AssignmentStatus::Assigned)
  }
}

/// A unit of work handed to a worker. Terminal once completed or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
  pub task_id: String,
  pub worker_id: String,
  pub worker_type: String,
  pub capability: String,
  pub params: serde_json::Value,
  pub assigned_at: DateTime<Utc>,
  pub status: AssignmentStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}
