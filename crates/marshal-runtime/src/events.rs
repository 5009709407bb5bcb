//! Workflow events and notifiers for observability.
//!
//! The engine and the workflow context emit events as instances start, apply
//! signals, run activities and finish. Consumers decide what to do with them.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowEvent {
  WorkflowStarted {
    instance_id: String,
    workflow_type: String,
  },

  /// A signal mutated the instance state.
  SignalApplied { instance_id: String, signal: String },

  /// A signal was delivered but had no effect (duplicate or stale).
  SignalIgnored { instance_id: String, signal: String },

  ActivityScheduled {
    instance_id: String,
    activity: String,
    attempt: u32,
  },

  ActivityCompleted {
    instance_id: String,
    activity: String,
    attempt: u32,
  },

  ActivityFailed {
    instance_id: String,
    activity: String,
    attempt: u32,
    error: String,
    will_retry: bool,
  },

  WorkflowCompleted { instance_id: String },

  /// The run timeline panicked; no result was produced.
  WorkflowCrashed { instance_id: String, error: String },
}

/// Receives workflow events.
pub trait WorkflowNotifier: Send + Sync {
  fn notify(&self, event: WorkflowEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl WorkflowNotifier for NoopNotifier {
  fn notify(&self, _event: WorkflowEvent) {}
}

/// Sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a workflow. Event volume is a
/// handful per activity.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
    Self { sender }
  }
}

impl WorkflowNotifier for ChannelNotifier {
  fn notify(&self, event: WorkflowEvent) {
    // receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Writes every event to the `tracing` subscriber at debug level.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl WorkflowNotifier for TracingNotifier {
  fn notify(&self, event: WorkflowEvent) {
    debug!(?event, "workflow_event");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_notifier_survives_dropped_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    let notifier = ChannelNotifier::new(tx);
    drop(rx);
    notifier.notify(WorkflowEvent::WorkflowCompleted {
      instance_id: "x".to_string(),
    });
  }

  #[test]
  fn test_channel_notifier_delivers_in_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let notifier = ChannelNotifier::new(tx);
    notifier.notify(WorkflowEvent::WorkflowStarted {
      instance_id: "a".to_string(),
      workflow_type: "t".to_string(),
    });
    notifier.notify(WorkflowEvent::WorkflowCompleted {
      instance_id: "a".to_string(),
    });

    assert!(matches!(
      rx.try_recv().unwrap(),
      WorkflowEvent::WorkflowStarted { .. }
    ));
    assert!(matches!(
      rx.try_recv().unwrap(),
      WorkflowEvent::WorkflowCompleted { .. }
    ));
  }
}
