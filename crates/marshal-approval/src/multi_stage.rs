use std::time::Duration;

use async_trait::async_trait;
use marshal_activities::calls;
use marshal_activities::{ApprovalRequest, Channel, Notification};
use marshal_runtime::{SignalOutcome, ValidationError, WaitOutcome, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::deps::ApprovalDeps;
use crate::single;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
  pub approvers: Vec<String>,
  #[serde(default)]
  pub timeout_hours: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiStageInput {
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub data: serde_json::Value,
  pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDecision {
  Approved,
  Rejected,
  Timeout,
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
  /// 0-based stage index.
  pub stage: usize,
  pub decision: StageDecision,
  pub approver: Option<String>,
  pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiStageStatus {
  #[default]
  Pending,
  Running,
  Approved,
  Rejected,
  Cancelled,
  Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiStageState {
  pub status: MultiStageStatus,
  pub current_stage: usize,
  pub total_stages: usize,
  pub approval_ids: Vec<String>,
  pub stage_results: Vec<StageResult>,
}

impl MultiStageState {
  /// Record the current stage's outcome unless it already has one.
  fn record(&mut self, stage: usize, decision: StageDecision, approver: Option<String>, reason: Option<String>) -> bool {
    if stage != self.current_stage || self.stage_results.len() != stage {
      return false;
    }
    self.stage_results.push(StageResult {
      stage,
      decision,
      approver,
      reason,
    });
    true
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum MultiStageSignal {
  StageApprove {
    stage: usize,
    approver: String,
    #[serde(default)]
    reason: Option<String>,
  },
  StageReject {
    stage: usize,
    approver: String,
    reason: String,
  },
  Cancel {
    #[serde(default)]
    reason: Option<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStageResult {
  pub status: MultiStageStatus,
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rejected_at_stage: Option<usize>,
  pub reason: Option<String>,
  pub stage_results: Vec<StageResult>,
  pub message: String,
}

/// Sequential approval stages, each with its own approvers and timeout.
pub struct MultiStageApprovalWorkflow;

impl MultiStageApprovalWorkflow {
  fn finish(
    ctx: &mut WorkflowContext<Self>,
    status: MultiStageStatus,
    rejected_at_stage: Option<usize>,
    reason: Option<String>,
    message: String,
  ) -> MultiStageResult {
    ctx.update(|s| s.status = status);
    info!(?status, ?rejected_at_stage, "multi_stage_approval_finished");
    MultiStageResult {
      status,
      success: status == MultiStageStatus::Approved,
      rejected_at_stage,
      reason,
      stage_results: ctx.state().stage_results.clone(),
      message,
    }
  }
}

#[async_trait]
impl Workflow for MultiStageApprovalWorkflow {
  const TYPE: &'static str = "multi-stage-approval";
  type Input = MultiStageInput;
  type Output = MultiStageResult;
  type State = MultiStageState;
  type Signal = MultiStageSignal;
  type Deps = ApprovalDeps;

  fn validate(input: &MultiStageInput) -> Result<(), ValidationError> {
    if input.title.trim().is_empty() {
      return Err(ValidationError::new("title", "must not be empty"));
    }
    if input.stages.is_empty() {
      return Err(ValidationError::new("stages", "at least one stage is required"));
    }
    for (idx, stage) in input.stages.iter().enumerate() {
      single::validate_approvers(&format!("stages[{idx}].approvers"), &stage.approvers)?;
      if stage.timeout_hours == Some(0) {
        return Err(ValidationError::new(
          format!("stages[{idx}].timeout_hours"),
          "must be positive",
        ));
      }
    }
    Ok(())
  }

  fn on_signal(state: &mut MultiStageState, signal: MultiStageSignal) -> SignalOutcome {
    if state.status != MultiStageStatus::Running {
      return SignalOutcome::Ignored;
    }
    match signal {
      MultiStageSignal::StageApprove {
        stage,
        approver,
        reason,
      } => {
        if state.record(stage, StageDecision::Approved, Some(approver), reason) {
          SignalOutcome::Applied
        } else {
          SignalOutcome::Ignored
        }
      }
      MultiStageSignal::StageReject {
        stage,
        approver,
        reason,
      } => {
        if state.record(stage, StageDecision::Rejected, Some(approver), Some(reason)) {
          SignalOutcome::Applied
        } else {
          SignalOutcome::Ignored
        }
      }
      MultiStageSignal::Cancel { reason } => {
        let stage = state.current_stage;
        let reason = reason.unwrap_or_else(|| "Cancelled".to_string());
        if state.record(stage, StageDecision::Cancelled, None, Some(reason)) {
          SignalOutcome::Cancel
        } else {
          SignalOutcome::Ignored
        }
      }
    }
  }

  async fn run(
    ctx: &mut WorkflowContext<Self>,
    deps: ApprovalDeps,
    input: MultiStageInput,
  ) -> MultiStageResult {
    let total = input.stages.len();
    ctx.update(|s| {
      s.status = MultiStageStatus::Running;
      s.total_stages = total;
    });

    for (idx, stage) in input.stages.iter().enumerate() {
      ctx.update(|s| s.current_stage = idx);
      info!(stage = idx + 1, total, "approval_stage_started");

      let timeout_hours = stage
        .timeout_hours
        .unwrap_or(deps.defaults.default_timeout_hours);
      let request = ApprovalRequest {
        request_type: format!("multi-stage-{idx}"),
        title: format!("{} (stage {})", input.title, idx + 1),
        description: input.description.clone(),
        data: input.data.clone(),
        approvers: stage.approvers.clone(),
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
            s.record(idx, StageDecision::Cancelled, None, Some("Cancelled".to_string()))
          });
          return Self::finish(
            ctx,
            MultiStageStatus::Cancelled,
            Some(idx),
            Some("Cancelled".to_string()),
            format!("Cancelled at stage {}", idx + 1),
          );
        }
        Err(e) => {
          warn!(stage = idx, error = %e, "approval_request_failed");
          let reason = e.to_string();
          return Self::finish(
            ctx,
            MultiStageStatus::Failed,
            Some(idx),
            Some(reason.clone()),
            format!("Failed to create the stage {} request: {reason}", idx + 1),
          );
        }
      };

      let approval_id = record.approval_id;
      ctx.update(|s| s.approval_ids.push(approval_id.clone()));

      let announcement = Notification::new(
        Channel::App,
        format!("Multi-stage approval ({}/{total}): {}", idx + 1, input.title),
      )
      .to(stage.approvers.iter().cloned())
      .with("approval_id", approval_id)
      .with("stage", idx);
      if let Err(e) =
        calls::send_notification(ctx, &deps.notifications, &deps.policies.short, announcement).await
      {
        warn!(stage = idx, error = %e, "approver_notification_failed");
      }

      let timeout = Duration::from_secs(60 * 60) * timeout_hours;
      match ctx
        .wait_condition(|s| s.stage_results.len() > idx, timeout)
        .await
      {
        WaitOutcome::Satisfied => {}
        WaitOutcome::TimedOut => {
          ctx.update(|s| {
            s.record(
              idx,
              StageDecision::Timeout,
              None,
              Some(format!("Stage {} timed out", idx + 1)),
            )
          });
        }
        WaitOutcome::Cancelled => {
          ctx.update(|s| {
            s.record(idx, StageDecision::Cancelled, None, Some("Cancelled".to_string()))
          });
        }
      }

      let Some(result) = ctx.state().stage_results.get(idx).cloned() else {
        // unreachable while record() holds; treat like a timeout
        return Self::finish(
          ctx,
          MultiStageStatus::Failed,
          Some(idx),
          None,
          format!("Stage {} produced no decision", idx + 1),
        );
      };

      let status = match result.decision {
        StageDecision::Approved => continue,
        StageDecision::Cancelled => MultiStageStatus::Cancelled,
        StageDecision::Rejected | StageDecision::Timeout => MultiStageStatus::Rejected,
      };
      let message = format!(
        "Stopped at stage {}: {}",
        idx + 1,
        result.reason.as_deref().unwrap_or("no reason given")
      );
      return Self::finish(ctx, status, Some(idx), result.reason, message);
    }

    Self::finish(
      ctx,
      MultiStageStatus::Approved,
      None,
      None,
      format!("All {total} stages approved"),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn running(stage: usize, recorded: usize) -> MultiStageState {
    let mut state = MultiStageState {
      status: MultiStageStatus::Running,
      current_stage: stage,
      total_stages: 3,
      ..Default::default()
    };
    for i in 0..recorded {
      state.stage_results.push(StageResult {
        stage: i,
        decision: StageDecision::Approved,
        approver: Some("a".to_string()),
        reason: None,
      });
    }
    state
  }

  #[test]
  fn test_only_current_stage_accepts_decisions() {
    let mut state = running(1, 1);

    let stale = MultiStageSignal::StageApprove {
      stage: 0,
      approver: "a".to_string(),
      reason: None,
    };
    let early = MultiStageSignal::StageReject {
      stage: 2,
      approver: "c".to_string(),
      reason: "no".to_string(),
    };
    assert_eq!(MultiStageApprovalWorkflow::on_signal(&mut state, stale), SignalOutcome::Ignored);
    assert_eq!(MultiStageApprovalWorkflow::on_signal(&mut state, early), SignalOutcome::Ignored);

    let current = MultiStageSignal::StageApprove {
      stage: 1,
      approver: "b".to_string(),
      reason: None,
    };
    let again = MultiStageSignal::StageReject {
      stage: 1,
      approver: "b2".to_string(),
      reason: "changed my mind".to_string(),
    };
    assert_eq!(MultiStageApprovalWorkflow::on_signal(&mut state, current), SignalOutcome::Applied);
    assert_eq!(MultiStageApprovalWorkflow::on_signal(&mut state, again), SignalOutcome::Ignored);
    assert_eq!(state.stage_results.len(), 2);
    assert_eq!(state.stage_results[1].decision, StageDecision::Approved);
  }

  #[test]
  fn test_cancel_records_current_stage() {
    let mut state = running(0, 0);
    let outcome =
      MultiStageApprovalWorkflow::on_signal(&mut state, MultiStageSignal::Cancel { reason: None });
    assert_eq!(outcome, SignalOutcome::Cancel);
    assert_eq!(state.stage_results[0].decision, StageDecision::Cancelled);
  }

  #[test]
  fn test_stage_approvers_are_validated() {
    let input = |approvers: &[&str]| MultiStageInput {
      title: "Open the east wing".to_string(),
      description: String::new(),
      data: serde_json::Value::Null,
      stages: vec![
        StageConfig {
          approvers: vec!["lead".to_string()],
          timeout_hours: None,
        },
        StageConfig {
          approvers: approvers.iter().map(|a| a.to_string()).collect(),
          timeout_hours: Some(8),
        },
      ],
    };

    assert!(MultiStageApprovalWorkflow::validate(&input(&["manager", "director"])).is_ok());
    for approvers in [&[][..], &["manager", " "][..], &["manager", "manager"][..]] {
      let err = MultiStageApprovalWorkflow::validate(&input(approvers)).unwrap_err();
      assert_eq!(err.field, "stages[1].approvers");
    }
  }

  #[test]
  fn test_signals_before_start_are_ignored() {
    let mut state = MultiStageState::default();
    let signal = MultiStageSignal::StageApprove {
      stage: 0,
      approver: "a".to_string(),
      reason: None,
    };
    assert_eq!(MultiStageApprovalWorkflow::on_signal(&mut state, signal), SignalOutcome::Ignored);
  }
}
