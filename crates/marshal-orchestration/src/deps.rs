use marshal_activities::{Activities, ActivityPolicies};
use marshal_config::{DeliveryConfig, OrchestratorConfig};

/// Collaborators of the orchestration workflows.
#[derive(Clone)]
pub struct OrchestrationDeps {
  pub activities: Activities,
  pub policies: ActivityPolicies,
  pub delivery: DeliveryConfig,
}

impl OrchestrationDeps {
  pub fn new(activities: Activities) -> Self {
    Self {
      activities,
      policies: ActivityPolicies::default(),
      delivery: DeliveryConfig::default(),
    }
  }

  pub fn from_config(activities: Activities, config: &OrchestratorConfig) -> Self {
    Self {
      activities,
      policies: ActivityPolicies::from(&config.activities),
      delivery: config.delivery.clone(),
    }
  }
}
