//! In-process workflow engine.
//!
//! Instances run as tokio tasks. The engine keeps, per instance, the signal
//! sender, the published state and the eventual result, so the control surface
//! (signal, query, cancel, result) works during and after the run. Finished
//! instances stay until [`Engine::remove`] or [`Engine::prune_finished`]
//! drops them; typed handles already given out keep working.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::context::WorkflowContext;
use crate::error::EngineError;
use crate::events::{NoopNotifier, WorkflowEvent, WorkflowNotifier};
use crate::workflow::{STATUS_QUERY, Workflow};

type Outcome<T> = Option<Result<T, String>>;

struct Instance<W: Workflow> {
  id: String,
  signals: mpsc::UnboundedSender<W::Signal>,
  state: watch::Receiver<W::State>,
  result: watch::Receiver<Outcome<W::Output>>,
  cancel: CancellationToken,
}

impl<W: Workflow> Instance<W> {
  fn current_status(&self) -> InstanceStatus {
    match &*self.result.borrow() {
      None => InstanceStatus::Running,
      Some(Ok(_)) => InstanceStatus::Completed,
      Some(Err(_)) => InstanceStatus::Crashed,
    }
  }

  fn signal(&self, signal: W::Signal) {
    if self.current_status() != InstanceStatus::Running {
      debug!(instance_id = %self.id, ?signal, "signal_after_completion_ignored");
      return;
    }
    // the run may finish between the check and the send; such signals are dropped
    let _ = self.signals.send(signal);
  }

  async fn result(&self) -> Result<W::Output, EngineError> {
    let mut rx = self.result.clone();
    let outcome = rx
      .wait_for(Option::is_some)
      .await
      .map(|outcome| (*outcome).clone())
      .ok()
      .flatten();

    match outcome {
      Some(Ok(output)) => Ok(output),
      Some(Err(message)) => Err(EngineError::Crashed {
        instance_id: self.id.clone(),
        message,
      }),
      None => Err(EngineError::Crashed {
        instance_id: self.id.clone(),
        message: "instance dropped without a result".to_string(),
      }),
    }
  }
}

/// Type-erased view used by the JSON control surface.
trait ErasedInstance: Send + Sync {
  fn workflow_type(&self) -> &'static str;
  fn status(&self) -> InstanceStatus;
  fn query(&self) -> Result<serde_json::Value, EngineError>;
  fn signal_json(&self, value: serde_json::Value) -> Result<(), EngineError>;
  fn cancel(&self);
  fn result_json(&self) -> BoxFuture<'_, Result<serde_json::Value, EngineError>>;
  fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<W: Workflow> ErasedInstance for Instance<W> {
  fn workflow_type(&self) -> &'static str {
    W::TYPE
  }

  fn status(&self) -> InstanceStatus {
    self.current_status()
  }

  fn query(&self) -> Result<serde_json::Value, EngineError> {
    Ok(serde_json::to_value(&*self.state.borrow())?)
  }

  fn signal_json(&self, value: serde_json::Value) -> Result<(), EngineError> {
    let signal: W::Signal =
      serde_json::from_value(value).map_err(|e| EngineError::InvalidSignal {
        instance_id: self.id.clone(),
        message: e.to_string(),
      })?;
    self.signal(signal);
    Ok(())
  }

  fn cancel(&self) {
    self.cancel.cancel();
  }

  fn result_json(&self) -> BoxFuture<'_, Result<serde_json::Value, EngineError>> {
    async move { Ok(serde_json::to_value(self.result().await?)?) }.boxed()
  }

  fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
  Running,
  Completed,
  Crashed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
  pub instance_id: String,
  pub workflow_type: &'static str,
  pub status: InstanceStatus,
}

/// Typed control handle for one instance.
pub struct WorkflowHandle<W: Workflow> {
  inner: Arc<Instance<W>>,
}

impl<W: Workflow> Clone for WorkflowHandle<W> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<W: Workflow> WorkflowHandle<W> {
  pub fn id(&self) -> &str {
    &self.inner.id
  }

  /// Fire-and-forget. Ignored once the instance has finished.
  pub fn signal(&self, signal: W::Signal) {
    self.inner.signal(signal);
  }

  /// Latest published state; the final snapshot once finished.
  pub fn query(&self) -> W::State {
    W::State::clone(&self.inner.state.borrow())
  }

  /// Request cooperative cancellation.
  pub fn cancel(&self) {
    self.inner.cancel.cancel();
  }

  pub fn is_terminal(&self) -> bool {
    self.inner.current_status() != InstanceStatus::Running
  }

  /// Wait for the terminal result.
  pub async fn result(&self) -> Result<W::Output, EngineError> {
    self.inner.result().await
  }
}

/// Runs workflow instances on the current tokio runtime.
#[derive(Clone)]
pub struct Engine {
  instances: Arc<RwLock<HashMap<String, Arc<dyn ErasedInstance>>>>,
  notifier: Arc<dyn WorkflowNotifier>,
}

impl Default for Engine {
  fn default() -> Self {
    Self::new()
  }
}

impl Engine {
  /// An engine that discards events.
  pub fn new() -> Self {
    Self::with_notifier(NoopNotifier)
  }

  pub fn with_notifier(notifier: impl WorkflowNotifier + 'static) -> Self {
    Self {
      instances: Arc::new(RwLock::new(HashMap::new())),
      notifier: Arc::new(notifier),
    }
  }

  /// Validate the input and start a new instance.
  ///
  /// Without an explicit id one is generated as `<type>-<8 hex>`.
  pub async fn start<W: Workflow>(
    &self,
    instance_id: Option<String>,
    input: W::Input,
    deps: W::Deps,
  ) -> Result<WorkflowHandle<W>, EngineError> {
    W::validate(&input)?;
    let instance_id = instance_id.unwrap_or_else(|| generate_id(W::TYPE));

    let mut instances = self.instances.write().await;
    if instances.contains_key(&instance_id) {
      return Err(EngineError::AlreadyExists { instance_id });
    }

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(W::State::default());
    let (result_tx, result_rx) = watch::channel(None);
    let cancel = CancellationToken::new();

    let mut ctx = WorkflowContext::<W>::new(
      instance_id.clone(),
      signal_rx,
      state_tx,
      cancel.clone(),
      self.notifier.clone(),
    );

    let span = info_span!("workflow", workflow_type = W::TYPE, instance_id = %instance_id);
    let run = tokio::spawn(
      async move {
        info!("workflow_started");
        W::run(&mut ctx, deps, input).await
      }
      .instrument(span),
    );

    self.notifier.notify(WorkflowEvent::WorkflowStarted {
      instance_id: instance_id.clone(),
      workflow_type: W::TYPE.to_string(),
    });

    let notifier = self.notifier.clone();
    let id = instance_id.clone();
    tokio::spawn(async move {
      match run.await {
        Ok(output) => {
          info!(instance_id = %id, "workflow_completed");
          result_tx.send_replace(Some(Ok(output)));
          notifier.notify(WorkflowEvent::WorkflowCompleted { instance_id: id });
        }
        Err(e) => {
          let message = e.to_string();
          error!(instance_id = %id, error = %message, "workflow_crashed");
          result_tx.send_replace(Some(Err(message.clone())));
          notifier.notify(WorkflowEvent::WorkflowCrashed {
            instance_id: id,
            error: message,
          });
        }
      }
    });

    let instance = Arc::new(Instance::<W> {
      id: instance_id.clone(),
      signals: signal_tx,
      state: state_rx,
      result: result_rx,
      cancel,
    });
    instances.insert(instance_id, instance.clone());

    Ok(WorkflowHandle { inner: instance })
  }

  async fn get(&self, instance_id: &str) -> Result<Arc<dyn ErasedInstance>, EngineError> {
    self
      .instances
      .read()
      .await
      .get(instance_id)
      .cloned()
      .ok_or_else(|| EngineError::NotFound {
        instance_id: instance_id.to_string(),
      })
  }

  /// Re-attach a typed handle to an existing instance.
  pub async fn handle<W: Workflow>(&self, instance_id: &str) -> Result<WorkflowHandle<W>, EngineError> {
    let instance = self.get(instance_id).await?;
    let actual = instance.workflow_type();
    let inner = instance
      .into_any()
      .downcast::<Instance<W>>()
      .map_err(|_| EngineError::TypeMismatch {
        instance_id: instance_id.to_string(),
        expected: W::TYPE,
        actual,
      })?;
    Ok(WorkflowHandle { inner })
  }

  /// Run a named query against the instance's published state.
  pub async fn query(&self, instance_id: &str, query: &str) -> Result<serde_json::Value, EngineError> {
    let instance = self.get(instance_id).await?;
    if query != STATUS_QUERY {
      return Err(EngineError::UnknownQuery {
        query: query.to_string(),
      });
    }
    instance.query()
  }

  /// Deliver a serde-tagged signal, e.g. `{"signal": "approve", "approver": "m1"}`.
  pub async fn signal_json(&self, instance_id: &str, signal: serde_json::Value) -> Result<(), EngineError> {
    self.get(instance_id).await?.signal_json(signal)
  }

  pub async fn cancel(&self, instance_id: &str) -> Result<(), EngineError> {
    let instance = self.get(instance_id).await?;
    info!(instance_id = %instance_id, "cancel_requested");
    instance.cancel();
    Ok(())
  }

  /// Wait for the instance's result, serialized.
  pub async fn result_json(&self, instance_id: &str) -> Result<serde_json::Value, EngineError> {
    let instance = self.get(instance_id).await?;
    instance.result_json().await
  }

  /// Forget a finished instance. Running instances are refused.
  pub async fn remove(&self, instance_id: &str) -> Result<(), EngineError> {
    let mut instances = self.instances.write().await;
    let instance = instances
      .get(instance_id)
      .ok_or_else(|| EngineError::NotFound {
        instance_id: instance_id.to_string(),
      })?;
    if instance.status() == InstanceStatus::Running {
      return Err(EngineError::StillRunning {
        instance_id: instance_id.to_string(),
      });
    }
    instances.remove(instance_id);
    debug!(instance_id = %instance_id, "instance_removed");
    Ok(())
  }

  /// Forget every finished instance. Returns how many were dropped.
  pub async fn prune_finished(&self) -> usize {
    let mut instances = self.instances.write().await;
    let before = instances.len();
    instances.retain(|_, instance| instance.status() == InstanceStatus::Running);
    let pruned = before - instances.len();
    if pruned > 0 {
      info!(pruned, remaining = instances.len(), "instances_pruned");
    }
    pruned
  }

  /// All known instances, ordered by id.
  pub async fn list(&self) -> Vec<InstanceInfo> {
    let instances = self.instances.read().await;
    let mut infos: Vec<InstanceInfo> = instances
      .iter()
      .map(|(id, instance)| InstanceInfo {
        instance_id: id.clone(),
        workflow_type: instance.workflow_type(),
        status: instance.status(),
      })
      .collect();
    infos.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    infos
  }
}

fn generate_id(workflow_type: &str) -> String {
  let id = uuid::Uuid::new_v4().simple().to_string();
  format!("{}-{}", workflow_type, &id[..8])
}
