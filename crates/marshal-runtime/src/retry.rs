use std::time::Duration;

use marshal_config::RetryPolicyDef;

/// Exponential backoff: `initial_interval * backoff_coefficient^(attempt - 1)`,
/// capped at `maximum_interval`. No jitter, so retry timing is reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  pub initial_interval: Duration,
  pub backoff_coefficient: f64,
  pub maximum_interval: Duration,
  /// Total attempts including the first.
  pub maximum_attempts: u32,
}

impl RetryPolicy {
  /// A single attempt, no retries.
  pub fn none() -> Self {
    Self {
      maximum_attempts: 1,
      ..Self::default()
    }
  }

  /// Delay after the given failed attempt (1-based).
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
    let capped = secs.min(self.maximum_interval.as_secs_f64());
    Duration::try_from_secs_f64(capped).unwrap_or(self.maximum_interval)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&RetryPolicyDef::default())
  }
}

impl From<&RetryPolicyDef> for RetryPolicy {
  fn from(def: &RetryPolicyDef) -> Self {
    Self {
      initial_interval: Duration::from_millis(def.initial_interval_ms),
      backoff_coefficient: def.backoff_coefficient,
      maximum_interval: Duration::from_millis(def.maximum_interval_ms),
      maximum_attempts: def.maximum_attempts.max(1),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_grows_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff(1), Duration::from_secs(1));
    assert_eq!(policy.backoff(2), Duration::from_secs(2));
    assert_eq!(policy.backoff(4), Duration::from_secs(8));
    assert_eq!(policy.backoff(7), Duration::from_secs(60));
    assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
  }

  #[test]
  fn test_from_def() {
    let policy = RetryPolicy::from(&RetryPolicyDef {
      initial_interval_ms: 250,
      backoff_coefficient: 3.0,
      maximum_interval_ms: 1_000,
      maximum_attempts: 0,
    });
    assert_eq!(policy.backoff(1), Duration::from_millis(250));
    assert_eq!(policy.backoff(2), Duration::from_millis(750));
    assert_eq!(policy.backoff(3), Duration::from_millis(1_000));
    assert_eq!(policy.maximum_attempts, 1);
  }
}
