//! Activity execution: timeouts, heartbeats and retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

use crate::error::{ActivityError, ActivityFailure};
use crate::events::{WorkflowEvent, WorkflowNotifier};
use crate::retry::RetryPolicy;

/// Per-call execution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
  /// Limit for a single attempt.
  pub start_to_close_timeout: Duration,
  /// When set, an attempt that goes this long without a heartbeat fails.
  pub heartbeat_timeout: Option<Duration>,
  pub retry: RetryPolicy,
}

impl ActivityOptions {
  pub fn new(start_to_close_timeout: Duration, retry: RetryPolicy) -> Self {
    Self {
      start_to_close_timeout,
      heartbeat_timeout: None,
      retry,
    }
  }

  pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
    self.heartbeat_timeout = Some(timeout);
    self
  }
}

/// Handed to every activity attempt.
#[derive(Debug, Clone)]
pub struct ActivityContext {
  instance_id: String,
  activity: &'static str,
  attempt: u32,
  heartbeat: mpsc::UnboundedSender<()>,
  cancel: CancellationToken,
}

impl ActivityContext {
  /// A context not attached to any workflow. Heartbeats go nowhere and it is
  /// never cancelled.
  pub fn detached(activity: &'static str) -> Self {
    let (heartbeat, _) = mpsc::unbounded_channel();
    Self {
      instance_id: String::new(),
      activity,
      attempt: 1,
      heartbeat,
      cancel: CancellationToken::new(),
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  pub fn activity(&self) -> &'static str {
    self.activity
  }

  /// 1-based attempt number.
  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  /// Report liveness. Long-running activities call this periodically.
  pub fn heartbeat(&self) {
    let _ = self.heartbeat.send(());
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Resolves once the owning workflow has been cancelled.
  pub async fn cancelled(&self) {
    self.cancel.cancelled().await
  }
}

/// Where an activity runs: the owning instance, its cancellation and its notifier.
#[derive(Clone)]
pub(crate) struct ActivityScope {
  pub instance_id: String,
  pub cancel: CancellationToken,
  pub notifier: Arc<dyn WorkflowNotifier>,
}

/// Run an activity to a terminal result.
pub(crate) async fn run_activity<T, F, Fut>(
  scope: ActivityScope,
  name: &'static str,
  options: ActivityOptions,
  call: F,
) -> Result<T, ActivityFailure>
where
  F: Fn(ActivityContext) -> Fut,
  Fut: Future<Output = Result<T, ActivityError>>,
{
  let span = debug_span!("activity", activity = name, instance_id = %scope.instance_id);
  async move {
    let max_attempts = options.retry.maximum_attempts.max(1);
    let mut attempt = 1;

    loop {
      scope.notifier.notify(WorkflowEvent::ActivityScheduled {
        instance_id: scope.instance_id.clone(),
        activity: name.to_string(),
        attempt,
      });

      let error = if scope.cancel.is_cancelled() {
        ActivityError::Cancelled
      } else {
        let (heartbeat, beats) = mpsc::unbounded_channel();
        let ctx = ActivityContext {
          instance_id: scope.instance_id.clone(),
          activity: name,
          attempt,
          heartbeat,
          cancel: scope.cancel.clone(),
        };
        match run_attempt(call(ctx), &options, beats).await {
          Ok(value) => {
            debug!(attempt, "activity_completed");
            scope.notifier.notify(WorkflowEvent::ActivityCompleted {
              instance_id: scope.instance_id.clone(),
              activity: name.to_string(),
              attempt,
            });
            return Ok(value);
          }
          Err(e) => e,
        }
      };

      let will_retry =
        error.is_retryable() && attempt < max_attempts && !scope.cancel.is_cancelled();
      warn!(attempt, error = %error, will_retry, "activity_failed");
      scope.notifier.notify(WorkflowEvent::ActivityFailed {
        instance_id: scope.instance_id.clone(),
        activity: name.to_string(),
        attempt,
        error: error.to_string(),
        will_retry,
      });

      if !will_retry {
        return Err(ActivityFailure {
          activity: name.to_string(),
          attempts: attempt,
          source: error,
        });
      }

      tokio::select! {
        _ = tokio::time::sleep(options.retry.backoff(attempt)) => {}
        _ = scope.cancel.cancelled() => {
          return Err(ActivityFailure {
            activity: name.to_string(),
            attempts: attempt,
            source: ActivityError::Cancelled,
          });
        }
      }
      attempt += 1;
    }
  }
  .instrument(span)
  .await
}

/// One attempt under the start-to-close timeout, watched for heartbeats.
async fn run_attempt<T>(
  fut: impl Future<Output = Result<T, ActivityError>>,
  options: &ActivityOptions,
  mut beats: mpsc::UnboundedReceiver<()>,
) -> Result<T, ActivityError> {
  let limit = options.start_to_close_timeout;
  let fut = tokio::time::timeout(limit, fut);
  tokio::pin!(fut);

  let Some(heartbeat_timeout) = options.heartbeat_timeout else {
    return fut.await.unwrap_or(Err(ActivityError::Timeout(limit)));
  };

  loop {
    tokio::select! {
      biased;
      out = &mut fut => return out.unwrap_or(Err(ActivityError::Timeout(limit))),
      beat = tokio::time::timeout(heartbeat_timeout, beats.recv()) => match beat {
        Ok(Some(())) => continue,
        // the attempt dropped its context; only the overall limit applies now
        Ok(None) => return (&mut fut).await.unwrap_or(Err(ActivityError::Timeout(limit))),
        Err(_) => return Err(ActivityError::HeartbeatTimeout(heartbeat_timeout)),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;
  use crate::events::{ChannelNotifier, NoopNotifier};

  fn scope() -> ActivityScope {
    ActivityScope {
      instance_id: "test-1".to_string(),
      cancel: CancellationToken::new(),
      notifier: Arc::new(NoopNotifier),
    }
  }

  fn options(attempts: u32) -> ActivityOptions {
    ActivityOptions::new(
      Duration::from_secs(30),
      RetryPolicy {
        maximum_attempts: attempts,
        ..RetryPolicy::default()
      },
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_failures_are_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let started = tokio::time::Instant::now();
    let result = run_activity(scope(), "flaky", options(3), move |ctx| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        if ctx.attempt() < 3 {
          Err(ActivityError::transient("busy"))
        } else {
          Ok(ctx.attempt())
        }
      }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1s then 2s of backoff
    assert_eq!(started.elapsed(), Duration::from_secs(3));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_exhaust_into_failure() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scope = ActivityScope {
      notifier: Arc::new(ChannelNotifier::new(tx)),
      ..scope()
    };

    let err = run_activity(scope, "always_busy", options(3), |_| async {
      Err::<(), _>(ActivityError::transient("busy"))
    })
    .await
    .unwrap_err();

    assert_eq!(err.activity, "always_busy");
    assert_eq!(err.attempts, 3);
    assert_eq!(err.source, ActivityError::transient("busy"));

    let mut failures = Vec::new();
    while let Ok(event) = rx.try_recv() {
      if let WorkflowEvent::ActivityFailed { will_retry, .. } = event {
        failures.push(will_retry);
      }
    }
    assert_eq!(failures, vec![true, true, false]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fatal_error_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let err = run_activity(scope(), "broken", options(5), move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Err::<(), _>(ActivityError::fatal("no such door")) }
    })
    .await
    .unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_to_close_timeout() {
    let opts = ActivityOptions::new(Duration::from_secs(5), RetryPolicy::none());
    let err = run_activity(scope(), "slow", opts, |_| async {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(())
    })
    .await
    .unwrap_err();

    assert_eq!(err.source, ActivityError::Timeout(Duration::from_secs(5)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_missing_heartbeat_fails_attempt() {
    let opts = ActivityOptions::new(Duration::from_secs(3600), RetryPolicy::none())
      .with_heartbeat(Duration::from_secs(60));

    let err = run_activity(scope(), "silent", opts, |ctx| async move {
      ctx.heartbeat();
      tokio::time::sleep(Duration::from_secs(30)).await;
      ctx.heartbeat();
      // goes quiet
      tokio::time::sleep(Duration::from_secs(600)).await;
      Ok(())
    })
    .await
    .unwrap_err();

    assert_eq!(
      err.source,
      ActivityError::HeartbeatTimeout(Duration::from_secs(60))
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_regular_heartbeats_keep_long_activity_alive() {
    let opts = ActivityOptions::new(Duration::from_secs(3600), RetryPolicy::none())
      .with_heartbeat(Duration::from_secs(60));

    let minutes = run_activity(scope(), "long", opts, |ctx| async move {
      for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(30)).await;
        ctx.heartbeat();
      }
      Ok(5)
    })
    .await
    .unwrap();

    assert_eq!(minutes, 5);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancelled_scope_stops_retrying() {
    let scope = scope();
    let cancel = scope.cancel.clone();

    let err = run_activity(scope, "cancel_me", options(5), move |_| {
      cancel.cancel();
      async { Err::<(), _>(ActivityError::transient("busy")) }
    })
    .await
    .unwrap_err();

    assert_eq!(err.attempts, 1);
  }

  #[tokio::test]
  async fn test_already_cancelled_scope_skips_call() {
    let scope = scope();
    scope.cancel.cancel();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let err = run_activity(scope, "skipped", options(3), move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Ok::<(), ActivityError>(()) }
    })
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
