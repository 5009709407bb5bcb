//! Answers a running instance's human steps from the command line.

use std::collections::HashSet;
use std::time::Duration;

use marshal_runtime::{Engine, InstanceStatus, STATUS_QUERY};
use serde_json::{Value, json};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct Autopilot {
  pub approve_as: Option<String>,
  pub reject_as: Option<String>,
  pub confirm: bool,
}

impl Autopilot {
  fn is_idle(&self) -> bool {
    self.approve_as.is_none() && self.reject_as.is_none() && !self.confirm
  }

  /// Poll the instance and send each answer once. Returns when there is
  /// nothing to answer or the instance has finished.
  pub async fn drive(&self, engine: &Engine, instance_id: &str) {
    if self.is_idle() {
      return;
    }

    let mut sent = HashSet::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
      ticker.tick().await;

      let Some(info) = engine
        .list()
        .await
        .into_iter()
        .find(|i| i.instance_id == instance_id)
      else {
        return;
      };
      if info.status != InstanceStatus::Running {
        return;
      }

      let state = match engine.query(instance_id, STATUS_QUERY).await {
        Ok(state) => state,
        Err(e) => {
          warn!(instance_id = %instance_id, error = %e, "autopilot_query_failed");
          return;
        }
      };

      let Some((key, signal)) = self.answer(info.workflow_type, &state) else {
        continue;
      };
      if !sent.insert(key.clone()) {
        continue;
      }
      info!(instance_id = %instance_id, answer = %key, "autopilot_signal");
      if let Err(e) = engine.signal_json(instance_id, signal).await {
        warn!(instance_id = %instance_id, error = %e, "autopilot_signal_failed");
      }
    }
  }

  /// The signal the instance is waiting for, keyed so it is sent only once.
  fn answer(&self, workflow_type: &str, state: &Value) -> Option<(String, Value)> {
    let status = state.get("status").and_then(Value::as_str).unwrap_or_default();

    match workflow_type {
      "approval" if status == "waiting_approval" => {
        let signal = self.decision(json!({}))?;
        Some(("decision".to_string(), signal))
      }
      "multi-stage-approval" if status == "running" => {
        let stage = state.get("current_stage").and_then(Value::as_u64)?;
        let requested = array_len(state, "approval_ids") as u64 > stage;
        let undecided = array_len(state, "stage_results") as u64 == stage;
        if !(requested && undecided) {
          return None;
        }
        let mut signal = self.decision(json!({ "stage": stage }))?;
        let tag = match signal["signal"].as_str() {
          Some("approve") => "stage_approve",
          _ => "stage_reject",
        };
        signal["signal"] = json!(tag);
        Some((format!("stage-{stage}"), signal))
      }
      "delivery" if self.confirm => match status {
        "at_pickup_waiting" => Some(("pickup".to_string(), json!({ "signal": "confirm_pickup" }))),
        "at_delivery_waiting" => Some((
          "delivery".to_string(),
          json!({ "signal": "confirm_delivery", "signature": self.approve_as }),
        )),
        _ => None,
      },
      _ => None,
    }
  }

  fn decision(&self, mut base: Value) -> Option<Value> {
    let fields = match (&self.approve_as, &self.reject_as) {
      (Some(approver), _) => json!({ "signal": "approve", "approver": approver }),
      (None, Some(approver)) => json!({
        "signal": "reject",
        "approver": approver,
        "reason": "Rejected from the command line",
      }),
      (None, None) => return None,
    };
    if let (Some(base), Value::Object(fields)) = (base.as_object_mut(), fields) {
      base.extend(fields);
    }
    Some(base)
  }
}

fn array_len(state: &Value, field: &str) -> usize {
  state.get(field).and_then(Value::as_array).map_or(0, Vec::len)
}
