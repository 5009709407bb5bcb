use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use marshal_activities::calls;
use marshal_activities::{ApprovalRequest, Channel, Notification};
use marshal_runtime::{SignalOutcome, ValidationError, WaitOutcome, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::deps::ApprovalDeps;

const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalInput {
  pub request_type: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub data: serde_json::Value,
  pub approvers: Vec<String>,
  /// Defaults to the configured timeout.
  #[serde(default)]
  pub timeout_hours: Option<u32>,
  /// Hours after the request at which approvers are reminded. Offsets at or
  /// beyond the timeout are dropped. Unset or empty uses the configured
  /// default offsets.
  #[serde(default)]
  pub reminder_hours: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
  Approved,
  Rejected,
  Cancelled,
  Timeout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
  #[default]
  Pending,
  CreatingRequest,
  Notifying,
  WaitingApproval,
  Approved,
  Rejected,
  Cancelled,
  Timeout,
  /// The approval record could not be created.
  Failed,
}

impl From<ApprovalDecision> for ApprovalStatus {
  fn from(decision: ApprovalDecision) -> Self {
    match decision {
      ApprovalDecision::Approved => Self::Approved,
      ApprovalDecision::Rejected => Self::Rejected,
      ApprovalDecision::Cancelled => Self::Cancelled,
      ApprovalDecision::Timeout => Self::Timeout,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalState {
  pub status: ApprovalStatus,
  pub approval_id: Option<String>,
  pub decision: Option<ApprovalDecision>,
  pub decided_by: Option<String>,
  pub reason: Option<String>,
  pub form_data: Option<serde_json::Value>,
  pub reminders_sent: u32,
}

impl ApprovalState {
  /// Record a decision unless one exists. Returns whether this call decided.
  fn decide(
    &mut self,
    decision: ApprovalDecision,
    decided_by: Option<String>,
    reason: Option<String>,
    form_data: Option<serde_json::Value>,
  ) -> bool {
    if self.decision.is_some() {
      return false;
    }
    self.decision = Some(decision);
    self.decided_by = decided_by;
    self.reason = reason;
    self.form_data = form_data;
    true
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ApprovalSignal {
  Approve {
    approver: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    form_data: Option<serde_json::Value>,
  },
  Reject {
    approver: String,
    reason: String,
    #[serde(default)]
    form_data: Option<serde_json::Value>,
  },
  Cancel {
    #[serde(default)]
    reason: Option<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResult {
  pub approval_id: Option<String>,
  pub status: ApprovalStatus,
  pub decided_by: Option<String>,
  pub reason: Option<String>,
  pub form_data: Option<serde_json::Value>,
  pub success: bool,
  pub message: String,
}

/// Waits for one approver to approve or reject.
pub struct ApprovalWorkflow;

impl ApprovalWorkflow {
  fn result(state: &ApprovalState, message: String) -> ApprovalResult {
    ApprovalResult {
      approval_id: state.approval_id.clone(),
      status: state.status,
      decided_by: state.decided_by.clone(),
      reason: state.reason.clone(),
      form_data: state.form_data.clone(),
      success: state.status == ApprovalStatus::Approved,
      message,
    }
  }

  /// Reminder offsets below the timeout, ascending and deduplicated.
  fn reminder_schedule(reminder_hours: &[u32], timeout_hours: u32) -> Vec<Duration> {
    let mut hours: Vec<u32> = reminder_hours
      .iter()
      .copied()
      .filter(|h| *h < timeout_hours)
      .collect();
    hours.sort_unstable();
    hours.dedup();
    hours.into_iter().map(|h| HOUR * h).collect()
  }

  /// Wait for a decision, sending reminders at their offsets. Always leaves a
  /// decision in the state.
  async fn await_decision(
    ctx: &mut WorkflowContext<Self>,
    deps: &ApprovalDeps,
    input: &ApprovalInput,
    timeout_hours: u32,
    reminder_hours: &[u32],
  ) {
    let timeout = HOUR * timeout_hours;
    let mut reminders = Self::reminder_schedule(reminder_hours, timeout_hours).into_iter().peekable();
    let waiting_since = ctx.elapsed();

    loop {
      let waited = ctx.elapsed().saturating_sub(waiting_since);
      let next_reminder = reminders.peek().copied().filter(|r| *r < timeout);
      let until = next_reminder.unwrap_or(timeout);

      let outcome = ctx
        .wait_condition(|s| s.decision.is_some(), until.saturating_sub(waited))
        .await;

      match outcome {
        WaitOutcome::Satisfied => return,
        WaitOutcome::Cancelled => {
          ctx.update(|s| {
            s.decide(
              ApprovalDecision::Cancelled,
              None,
              Some("Cancelled".to_string()),
              None,
            )
          });
          return;
        }
        WaitOutcome::TimedOut if next_reminder.is_some() => {
          reminders.next();
          Self::send_reminder(ctx, deps, input).await;
        }
        WaitOutcome::TimedOut => {
          let reason = format!("Approval timed out after {timeout_hours} hours");
          warn!(approval_id = ?ctx.state().approval_id, "approval_timed_out");
          ctx.update(|s| s.decide(ApprovalDecision::Timeout, None, Some(reason), None));
          return;
        }
      }
    }
  }

  /// Best effort: a decision landing while the reminder is in flight does not
  /// stop it, and a failed reminder is only logged.
  async fn send_reminder(ctx: &mut WorkflowContext<Self>, deps: &ApprovalDeps, input: &ApprovalInput) {
    let approval_id = ctx.state().approval_id.clone().unwrap_or_default();
    let sent = calls::send_approval_reminder(
      ctx,
      &deps.notifications,
      &deps.policies.short,
      approval_id,
      input.approvers.clone(),
      format!("Reminder: '{}' is waiting for your decision", input.title),
    )
    .await;

    match sent {
      Ok(()) => ctx.update(|s| s.reminders_sent += 1),
      Err(e) => warn!(error = %e, "approval_reminder_failed"),
    }
  }
}

#[async_trait]
impl Workflow for ApprovalWorkflow {
  const TYPE: &'static str = "approval";
  type Input = ApprovalInput;
  type Output = ApprovalResult;
  type State = ApprovalState;
  type Signal = ApprovalSignal;
  type Deps = ApprovalDeps;

  fn validate(input: &ApprovalInput) -> Result<(), ValidationError> {
    if input.title.trim().is_empty() {
      return Err(ValidationError::new("title", "must not be empty"));
    }
    validate_approvers("approvers", &input.approvers)?;
    if input.timeout_hours == Some(0) {
      return Err(ValidationError::new("timeout_hours", "must be positive"));
    }
    Ok(())
  }

  fn on_signal(state: &mut ApprovalState, signal: ApprovalSignal) -> SignalOutcome {
    let decided = match signal {
      ApprovalSignal::Approve {
        approver,
        reason,
        form_data,
      } => state.decide(ApprovalDecision::Approved, Some(approver), reason, form_data),
      ApprovalSignal::Reject {
        approver,
        reason,
        form_data,
      } => state.decide(
        ApprovalDecision::Rejected,
        Some(approver),
        Some(reason),
        form_data,
      ),
      ApprovalSignal::Cancel { reason } => state.decide(
        ApprovalDecision::Cancelled,
        None,
        Some(reason.unwrap_or_else(|| "Cancelled".to_string())),
        None,
      ),
    };

    if decided {
      SignalOutcome::Applied
    } else {
      warn!(decision = ?state.decision, "approval_already_decided");
      SignalOutcome::Ignored
    }
  }

  async fn run(
    ctx: &mut WorkflowContext<Self>,
    deps: ApprovalDeps,
    input: ApprovalInput,
  ) -> ApprovalResult {
    let timeout_hours = input
      .timeout_hours
      .unwrap_or(deps.defaults.default_timeout_hours);
    let reminder_hours = match &input.reminder_hours {
      Some(hours) if !hours.is_empty() => hours.clone(),
      _ => deps.defaults.default_reminder_hours.clone(),
    };

    ctx.update(|s| s.status = ApprovalStatus::CreatingRequest);
    info!(title = %input.title, approvers = ?input.approvers, "approval_started");

    let request = ApprovalRequest {
      request_type: input.request_type.clone(),
      title: input.title.clone(),
      description: input.description.clone(),
      data: input.data.clone(),
      approvers: input.approvers.clone(),
      timeout_minutes: timeout_hours.saturating_mul(60),
    };
    let record = calls::create_approval_request(
      ctx,
      &deps.notifications,
      &deps.policies.short,
      request,
    )
    .await;

    let record = match record {
      Ok(record) => record,
      Err(e) if e.is_cancelled() => {
        ctx.update(|s| {
          s.decide(ApprovalDecision::Cancelled, None, Some("Cancelled".to_string()), None);
          s.status = ApprovalStatus::Cancelled;
        });
        return Self::result(ctx.state(), "Approval cancelled before the request was created".to_string());
      }
      Err(e) => {
        warn!(error = %e, "approval_request_failed");
        ctx.update(|s| s.status = ApprovalStatus::Failed);
        return Self::result(ctx.state(), format!("Failed to create approval request: {e}"));
      }
    };

    let approval_id = record.approval_id.clone();
    ctx.update(|s| {
      s.approval_id = Some(record.approval_id);
      s.status = ApprovalStatus::Notifying;
    });

    let announcement = Notification::new(Channel::App, format!("New approval request: {}", input.title))
      .to(input.approvers.iter().cloned())
      .with("approval_id", approval_id.clone())
      .with("type", input.request_type.clone())
      .with("data", input.data.clone());
    if let Err(e) =
      calls::send_notification(ctx, &deps.notifications, &deps.policies.short, announcement).await
    {
      warn!(error = %e, "approver_notification_failed");
    }

    ctx.update(|s| s.status = ApprovalStatus::WaitingApproval);
    Self::await_decision(ctx, &deps, &input, timeout_hours, &reminder_hours).await;

    let decision = ctx.state().decision.unwrap_or(ApprovalDecision::Timeout);
    ctx.update(|s| s.status = decision.into());
    info!(approval_id = %approval_id, ?decision, decided_by = ?ctx.state().decided_by, "approval_decided");

    let state = ctx.state().clone();
    let outcome = Notification::new(
      Channel::Ops,
      format!("Approval {}: {}", status_text(decision), input.title),
    )
    .with("approval_id", approval_id)
    .with("status", serde_json::to_value(decision).unwrap_or_default())
    .with("decided_by", state.decided_by.clone())
    .with("reason", state.reason.clone());

    // sent even after a cancellation
    let notifications = deps.notifications.clone();
    let sent = ctx
      .cleanup_activity("send_notification", &deps.policies.short, move |actx| {
        let notifications = notifications.clone();
        let outcome = outcome.clone();
        async move { notifications.send_notification(&actx, &outcome).await }
      })
      .await;
    if let Err(e) = sent {
      warn!(error = %e, "approval_result_notification_failed");
    }

    let message = match decision {
      ApprovalDecision::Approved => "Approved".to_string(),
      _ => state
        .reason
        .clone()
        .unwrap_or_else(|| status_text(decision).to_string()),
    };
    Self::result(&state, message)
  }
}

/// At least one approver, none blank, none listed twice.
pub(crate) fn validate_approvers(field: &str, approvers: &[String]) -> Result<(), ValidationError> {
  if approvers.is_empty() {
    return Err(ValidationError::new(field, "at least one approver is required"));
  }
  let mut seen = HashSet::new();
  for approver in approvers {
    if approver.trim().is_empty() {
      return Err(ValidationError::new(field, "approver names must not be empty"));
    }
    if !seen.insert(approver) {
      return Err(ValidationError::new(
        field,
        format!("'{approver}' is listed twice"),
      ));
    }
  }
  Ok(())
}

fn status_text(decision: ApprovalDecision) -> &'static str {
  match decision {
    ApprovalDecision::Approved => "approved",
    ApprovalDecision::Rejected => "rejected",
    ApprovalDecision::Cancelled => "cancelled",
    ApprovalDecision::Timeout => "timed out",
  }
}
