//! The run timeline's view of its instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::activity::{ActivityContext, ActivityOptions, ActivityScope, run_activity};
use crate::error::{ActivityError, ActivityFailure};
use crate::events::{WorkflowEvent, WorkflowNotifier};
use crate::workflow::{SignalOutcome, Workflow};

/// How a [`WorkflowContext::wait_condition`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
  Satisfied,
  TimedOut,
  Cancelled,
}

/// Owns an instance's state for the length of its run.
///
/// Signals queue up while the timeline is busy and are applied, in order, at
/// the next suspension point. Every state change is published immediately for
/// queries.
pub struct WorkflowContext<W: Workflow> {
  instance_id: String,
  state: W::State,
  signals: mpsc::UnboundedReceiver<W::Signal>,
  published: watch::Sender<W::State>,
  cancel: CancellationToken,
  notifier: Arc<dyn WorkflowNotifier>,
  started: Instant,
  started_at: DateTime<Utc>,
}

impl<W: Workflow> WorkflowContext<W> {
  pub(crate) fn new(
    instance_id: String,
    signals: mpsc::UnboundedReceiver<W::Signal>,
    published: watch::Sender<W::State>,
    cancel: CancellationToken,
    notifier: Arc<dyn WorkflowNotifier>,
  ) -> Self {
    Self {
      instance_id,
      state: W::State::default(),
      signals,
      published,
      cancel,
      notifier,
      started: Instant::now(),
      started_at: Utc::now(),
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  pub fn state(&self) -> &W::State {
    &self.state
  }

  /// Mutate the state and publish the new snapshot.
  pub fn update<R>(&mut self, f: impl FnOnce(&mut W::State) -> R) -> R {
    let out = f(&mut self.state);
    self.publish();
    out
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Substrate clock: start time plus the elapsed instance time.
  pub fn now(&self) -> DateTime<Utc> {
    let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default();
    self.started_at + elapsed
  }

  pub fn elapsed(&self) -> Duration {
    self.started.elapsed()
  }

  fn publish(&self) {
    self.published.send_replace(self.state.clone());
  }

  fn apply_signal(&mut self, signal: W::Signal) {
    let description = format!("{signal:?}");
    let instance_id = self.instance_id.clone();

    match W::on_signal(&mut self.state, signal) {
      SignalOutcome::Ignored => {
        info!(instance_id = %instance_id, signal = %description, "signal_ignored");
        self.notifier.notify(WorkflowEvent::SignalIgnored {
          instance_id,
          signal: description,
        });
        return;
      }
      SignalOutcome::Applied => {
        debug!(instance_id = %instance_id, signal = %description, "signal_applied");
      }
      SignalOutcome::Cancel => {
        info!(instance_id = %instance_id, signal = %description, "cancel_requested");
        self.cancel.cancel();
      }
    }

    self.publish();
    self.notifier.notify(WorkflowEvent::SignalApplied {
      instance_id,
      signal: description,
    });
  }

  /// Drive `fut` to completion, applying signals that arrive meanwhile.
  pub async fn suspend<F>(&mut self, fut: F) -> F::Output
  where
    F: Future + Send,
  {
    tokio::pin!(fut);
    loop {
      tokio::select! {
        biased;
        Some(signal) = self.signals.recv() => self.apply_signal(signal),
        out = &mut fut => return out,
      }
    }
  }

  /// Block until `predicate` holds, `timeout` elapses, or the instance is
  /// cancelled. The predicate is re-evaluated after every applied signal and
  /// once more at the deadline.
  pub async fn wait_condition(
    &mut self,
    predicate: impl Fn(&W::State) -> bool + Send,
    timeout: Duration,
  ) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
      if predicate(&self.state) {
        return WaitOutcome::Satisfied;
      }
      if self.cancel.is_cancelled() {
        return WaitOutcome::Cancelled;
      }

      tokio::select! {
        biased;
        Some(signal) = self.signals.recv() => self.apply_signal(signal),
        _ = self.cancel.cancelled() => {}
        _ = tokio::time::sleep_until(deadline) => {
          return if predicate(&self.state) {
            WaitOutcome::Satisfied
          } else {
            WaitOutcome::TimedOut
          };
        }
      }
    }
  }

  /// Delay for `duration`, applying signals meanwhile. Returns `false` when
  /// the instance was cancelled before the delay ran out.
  pub async fn sleep(&mut self, duration: Duration) -> bool {
    let cancel = self.cancel.clone();
    self
      .suspend(async move {
        tokio::select! {
          _ = cancel.cancelled() => false,
          _ = tokio::time::sleep(duration) => true,
        }
      })
      .await
  }

  /// Build an activity future for fan-out. It does not apply signals on its
  /// own; await it through [`WorkflowContext::suspend`].
  pub fn activity<T, F, Fut>(
    &self,
    name: &'static str,
    options: &ActivityOptions,
    call: F,
  ) -> BoxFuture<'static, Result<T, ActivityFailure>>
  where
    T: Send + 'static,
    F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ActivityError>> + Send + 'static,
  {
    run_activity(self.scope(self.cancel.clone()), name, options.clone(), call).boxed()
  }

  /// Run one activity to a terminal result.
  pub async fn execute_activity<T, F, Fut>(
    &mut self,
    name: &'static str,
    options: &ActivityOptions,
    call: F,
  ) -> Result<T, ActivityFailure>
  where
    T: Send + 'static,
    F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ActivityError>> + Send + 'static,
  {
    let fut = self.activity(name, options, call);
    self.suspend(fut).await
  }

  /// Run a teardown activity. It is not tied to the instance's cancellation,
  /// so it runs even when the cancellation is what led to the teardown.
  pub async fn cleanup_activity<T, F, Fut>(
    &mut self,
    name: &'static str,
    options: &ActivityOptions,
    call: F,
  ) -> Result<T, ActivityFailure>
  where
    T: Send + 'static,
    F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ActivityError>> + Send + 'static,
  {
    let fut = run_activity(self.scope(CancellationToken::new()), name, options.clone(), call).boxed();
    self.suspend(fut).await
  }

  fn scope(&self, cancel: CancellationToken) -> ActivityScope {
    ActivityScope {
      instance_id: self.instance_id.clone(),
      cancel,
      notifier: self.notifier.clone(),
    }
  }
}
