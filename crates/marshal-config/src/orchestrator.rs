use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityConfig;
use crate::error::ConfigError;
use crate::fleet::FleetConfig;

/// Defaults applied to approval workflows whose input leaves them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
  pub default_timeout_hours: u32,
  pub default_reminder_hours: Vec<u32>,
}

impl Default for ApprovalConfig {
  fn default() -> Self {
    Self {
      default_timeout_hours: 24,
      default_reminder_hours: vec![1, 4, 12],
    }
  }
}

/// Confirmation windows for deliveries. A window that elapses without a
/// confirmation signal auto-confirms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
  pub pickup_window_ms: u64,
  pub delivery_window_ms: u64,
}

impl Default for DeliveryConfig {
  fn default() -> Self {
    Self {
      pickup_window_ms: 10 * 60_000,
      delivery_window_ms: 15 * 60_000,
    }
  }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// `tracing` filter directive, e.g. `info` or `marshal_runtime=debug`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log_filter: Option<String>,
  pub activities: ActivityConfig,
  pub approval: ApprovalConfig,
  pub delivery: DeliveryConfig,
  pub fleet: FleetConfig,
}

impl OrchestratorConfig {
  /// Parse and validate a configuration from JSON text.
  pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Read a configuration file from disk.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&content)
  }

  /// Check cross-field constraints serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let retry = &self.activities.retry;
    if retry.maximum_attempts == 0 {
      return Err(ConfigError::Invalid(
        "activities.retry.maximum_attempts must be at least 1".to_string(),
      ));
    }
    if retry.backoff_coefficient < 1.0 {
      return Err(ConfigError::Invalid(
        "activities.retry.backoff_coefficient must be >= 1.0".to_string(),
      ));
    }
    let activities = &self.activities;
    let timeouts = [
      ("short_timeout_ms", activities.short_timeout_ms),
      ("elevator_timeout_ms", activities.elevator_timeout_ms),
      ("assign_timeout_ms", activities.assign_timeout_ms),
      ("completion_timeout_ms", activities.completion_timeout_ms),
      ("heartbeat_timeout_ms", activities.heartbeat_timeout_ms),
      ("execution_timeout_ms", activities.execution_timeout_ms),
    ];
    if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
      return Err(ConfigError::Invalid(format!(
        "activities.{name} must be positive"
      )));
    }
    if self.approval.default_timeout_hours == 0 {
      return Err(ConfigError::Invalid(
        "approval.default_timeout_hours must be positive".to_string(),
      ));
    }
    for worker in &self.fleet.workers {
      if worker.max_load == 0 {
        return Err(ConfigError::Invalid(format!(
          "worker '{}' has max_load 0",
          worker.worker_id
        )));
      }
    }
    Ok(())
  }
}
