use std::sync::Arc;

use marshal_activities::{Activities, ActivityPolicies, NotificationActivities};
use marshal_config::{ApprovalConfig, OrchestratorConfig};

/// Collaborators of the approval workflows.
#[derive(Clone)]
pub struct ApprovalDeps {
  pub notifications: Arc<dyn NotificationActivities>,
  pub policies: ActivityPolicies,
  pub defaults: ApprovalConfig,
}

impl ApprovalDeps {
  pub fn new(notifications: Arc<dyn NotificationActivities>) -> Self {
    Self {
      notifications,
      policies: ActivityPolicies::default(),
      defaults: ApprovalConfig::default(),
    }
  }

  pub fn from_config(activities: &Activities, config: &OrchestratorConfig) -> Self {
    Self {
      notifications: activities.notifications.clone(),
      policies: ActivityPolicies::from(&config.activities),
      defaults: config.approval.clone(),
    }
  }
}
