use serde::{Deserialize, Serialize};

/// A worker registered with the dispatcher at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDef {
  pub worker_id: String,
  pub worker_type: String,
  pub capabilities: Vec<String>,
  #[serde(default = "default_max_load")]
  pub max_load: u32,
  #[serde(default)]
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_max_load() -> u32 {
  5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
  pub workers: Vec<WorkerDef>,
}

impl FleetConfig {
  /// The demonstration fleet: two service robots and one facility controller.
  pub fn demo() -> Self {
    let worker = |id: &str, worker_type: &str, capabilities: &[&str]| WorkerDef {
      worker_id: id.to_string(),
      worker_type: worker_type.to_string(),
      capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
      max_load: default_max_load(),
      metadata: serde_json::Map::new(),
    };

    Self {
      workers: vec![
        worker(
          "robot-001",
          "robot",
          &[
            "cleaning.floor.standard",
            "cleaning.floor.deep",
            "cleaning.floor.quick",
            "delivery.*",
          ],
        ),
        worker("robot-002", "robot", &["cleaning.floor.standard", "patrol.*"]),
        worker(
          "facility-001",
          "facility",
          &["elevator.call", "door.open", "door.close", "access.grant"],
        ),
      ],
    }
  }
}
