use std::sync::Arc;
use std::time::Duration;

use marshal_config::ActivityConfig;
use marshal_dispatch::Dispatcher;
use marshal_runtime::{ActivityOptions, RetryPolicy};

use crate::facility::{FacilityActivities, SimulatedFacility};
use crate::notification::{LogNotifications, NotificationActivities};
use crate::robot::{FleetRobots, RobotActivities};

/// Every activity implementation a workflow may call.
#[derive(Clone)]
pub struct Activities {
  pub facility: Arc<dyn FacilityActivities>,
  pub robots: Arc<dyn RobotActivities>,
  pub notifications: Arc<dyn NotificationActivities>,
}

impl Activities {
  /// In-process implementations over the given dispatcher.
  pub fn simulated(dispatcher: Arc<Dispatcher>) -> Self {
    Self {
      facility: Arc::new(SimulatedFacility::new()),
      robots: Arc::new(FleetRobots::new(dispatcher)),
      notifications: Arc::new(LogNotifications::new()),
    }
  }
}

/// Execution settings per class of activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityPolicies {
  /// Status lookups, doors, zone access, notifications.
  pub short: ActivityOptions,
  pub elevator: ActivityOptions,
  pub assign: ActivityOptions,
  /// Waiting on a robot task; heartbeat-monitored.
  pub completion: ActivityOptions,
  /// Overall limit on a robot task, independent of retries.
  pub execution_timeout: Duration,
}

impl Default for ActivityPolicies {
  fn default() -> Self {
    Self::from(&ActivityConfig::default())
  }
}

impl From<&ActivityConfig> for ActivityPolicies {
  fn from(config: &ActivityConfig) -> Self {
    let retry = RetryPolicy::from(&config.retry);
    let options = |ms: u64| ActivityOptions::new(Duration::from_millis(ms), retry.clone());

    Self {
      short: options(config.short_timeout_ms),
      elevator: options(config.elevator_timeout_ms),
      assign: options(config.assign_timeout_ms),
      completion: options(config.completion_timeout_ms)
        .with_heartbeat(Duration::from_millis(config.heartbeat_timeout_ms)),
      execution_timeout: Duration::from_millis(config.execution_timeout_ms),
    }
  }
}
