use std::time::Duration;

use async_trait::async_trait;
use marshal_runtime::{
  ActivityOptions, ChannelNotifier, Engine, EngineError, InstanceStatus, RetryPolicy,
  STATUS_QUERY, SignalOutcome, ValidationError, WaitOutcome, Workflow, WorkflowContext,
  WorkflowEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

/// Opens once enough pushes have been counted.
struct Turnstile;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TurnstileInput {
  required: u32,
  timeout_secs: u64,
  #[serde(default)]
  warmup_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TurnstileState {
  status: String,
  count: u32,
  cancel_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
enum TurnstileSignal {
  Push { by: u32 },
  Cancel { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TurnstileOutput {
  outcome: String,
  count: u32,
  elapsed_secs: u64,
}

#[async_trait]
impl Workflow for Turnstile {
  const TYPE: &'static str = "turnstile";
  type Input = TurnstileInput;
  type Output = TurnstileOutput;
  type State = TurnstileState;
  type Signal = TurnstileSignal;
  type Deps = ();

  fn validate(input: &Self::Input) -> Result<(), ValidationError> {
    if input.required == 0 {
      return Err(ValidationError::new("required", "must be positive"));
    }
    Ok(())
  }

  fn on_signal(state: &mut Self::State, signal: Self::Signal) -> SignalOutcome {
    match signal {
      TurnstileSignal::Push { by: 0 } => SignalOutcome::Ignored,
      TurnstileSignal::Push { by } => {
        state.count += by;
        SignalOutcome::Applied
      }
      TurnstileSignal::Cancel { reason } => {
        state.cancel_reason = Some(reason);
        SignalOutcome::Cancel
      }
    }
  }

  async fn run(ctx: &mut WorkflowContext<Self>, _deps: (), input: TurnstileInput) -> TurnstileOutput {
    if input.warmup_secs > 0 {
      ctx.update(|s| s.status = "warming_up".to_string());
      let warmup = Duration::from_secs(input.warmup_secs);
      let options = ActivityOptions::new(warmup * 2, RetryPolicy::none());
      let _ = ctx
        .execute_activity("warm_up", &options, move |_| async move {
          tokio::time::sleep(warmup).await;
          Ok(())
        })
        .await;
    }

    ctx.update(|s| s.status = "waiting".to_string());
    let required = input.required;
    let outcome = ctx
      .wait_condition(
        move |s| s.count >= required,
        Duration::from_secs(input.timeout_secs),
      )
      .await;

    let outcome = match outcome {
      WaitOutcome::Satisfied => "satisfied",
      WaitOutcome::TimedOut => "timed_out",
      WaitOutcome::Cancelled => "cancelled",
    };
    ctx.update(|s| s.status = outcome.to_string());

    TurnstileOutput {
      outcome: outcome.to_string(),
      count: ctx.state().count,
      elapsed_secs: ctx.elapsed().as_secs(),
    }
  }
}

struct Crasher;

#[async_trait]
impl Workflow for Crasher {
  const TYPE: &'static str = "crasher";
  type Input = ();
  type Output = ();
  type State = ();
  type Signal = TurnstileSignal;
  type Deps = ();

  fn on_signal(_state: &mut (), _signal: TurnstileSignal) -> SignalOutcome {
    SignalOutcome::Ignored
  }

  async fn run(_ctx: &mut WorkflowContext<Self>, _deps: (), _input: ()) {
    panic!("boom");
  }
}

/// Sleeps through a fixed delay, counting pushes that arrive meanwhile.
struct Dozer;

#[async_trait]
impl Workflow for Dozer {
  const TYPE: &'static str = "dozer";
  type Input = u64;
  type Output = TurnstileOutput;
  type State = TurnstileState;
  type Signal = TurnstileSignal;
  type Deps = ();

  fn on_signal(state: &mut Self::State, signal: Self::Signal) -> SignalOutcome {
    Turnstile::on_signal(state, signal)
  }

  async fn run(ctx: &mut WorkflowContext<Self>, _deps: (), secs: u64) -> TurnstileOutput {
    ctx.update(|s| s.status = "sleeping".to_string());
    let outcome = if ctx.sleep(Duration::from_secs(secs)).await {
      "rested"
    } else {
      "cancelled"
    };
    ctx.update(|s| s.status = outcome.to_string());

    TurnstileOutput {
      outcome: outcome.to_string(),
      count: ctx.state().count,
      elapsed_secs: ctx.elapsed().as_secs(),
    }
  }
}

fn input(required: u32, timeout_secs: u64) -> TurnstileInput {
  TurnstileInput {
    required,
    timeout_secs,
    warmup_secs: 0,
  }
}

#[tokio::test(start_paused = true)]
async fn test_condition_satisfied_by_signals() {
  let engine = Engine::new();
  let handle = engine
    .start::<Turnstile>(Some("t-1".to_string()), input(3, 60), ())
    .await
    .unwrap();

  handle.signal(TurnstileSignal::Push { by: 1 });
  engine
    .signal_json("t-1", json!({"signal": "push", "by": 2}))
    .await
    .unwrap();

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "satisfied");
  assert_eq!(output.count, 3);
  assert_eq!(output.elapsed_secs, 0);

  let status = engine.query("t-1", STATUS_QUERY).await.unwrap();
  assert_eq!(status["status"], "satisfied");
  assert_eq!(status["count"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_condition_times_out() {
  let engine = Engine::new();
  let handle = engine.start::<Turnstile>(None, input(5, 60), ()).await.unwrap();
  handle.signal(TurnstileSignal::Push { by: 1 });

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "timed_out");
  assert_eq!(output.count, 1);
  assert_eq!(output.elapsed_secs, 60);
  assert!(handle.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_engine_cancel_interrupts_wait() {
  let engine = Engine::new();
  let handle = engine
    .start::<Turnstile>(Some("t-c".to_string()), input(5, 3600), ())
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(10)).await;
  engine.cancel("t-c").await.unwrap();

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "cancelled");
  assert_eq!(output.elapsed_secs, 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_signal_records_reason() {
  let engine = Engine::new();
  let handle = engine
    .start::<Turnstile>(Some("t-s".to_string()), input(5, 3600), ())
    .await
    .unwrap();

  engine
    .signal_json("t-s", json!({"signal": "cancel", "reason": "closing"}))
    .await
    .unwrap();

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "cancelled");
  assert_eq!(handle.query().cancel_reason.as_deref(), Some("closing"));
}

#[tokio::test(start_paused = true)]
async fn test_signals_apply_while_activity_runs() {
  let engine = Engine::new();
  let handle = engine
    .start::<Turnstile>(
      None,
      TurnstileInput {
        required: 1,
        timeout_secs: 60,
        warmup_secs: 30,
      },
      (),
    )
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(1)).await;
  handle.signal(TurnstileSignal::Push { by: 1 });
  tokio::time::sleep(Duration::from_secs(1)).await;

  let state = handle.query();
  assert_eq!(state.status, "warming_up");
  assert_eq!(state.count, 1);

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "satisfied");
  assert_eq!(output.elapsed_secs, 30);
}

#[tokio::test(start_paused = true)]
async fn test_signals_apply_during_sleep() {
  let engine = Engine::new();
  let handle = engine
    .start::<Dozer>(Some("d-1".to_string()), 60, ())
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(5)).await;
  engine
    .signal_json("d-1", json!({"signal": "push", "by": 2}))
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_secs(1)).await;

  let status = engine.query("d-1", STATUS_QUERY).await.unwrap();
  assert_eq!(status["status"], "sleeping");
  assert_eq!(status["count"], 2);

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "rested");
  assert_eq!(output.count, 2);
  assert_eq!(output.elapsed_secs, 60);
}

#[tokio::test(start_paused = true)]
async fn test_engine_cancel_interrupts_sleep() {
  let engine = Engine::new();
  let handle = engine
    .start::<Dozer>(Some("d-c".to_string()), 3600, ())
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(10)).await;
  engine.cancel("d-c").await.unwrap();

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "cancelled");
  assert_eq!(output.elapsed_secs, 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_signal_interrupts_sleep() {
  let engine = Engine::new();
  let handle = engine.start::<Dozer>(None, 3600, ()).await.unwrap();

  tokio::time::sleep(Duration::from_secs(1)).await;
  handle.signal(TurnstileSignal::Cancel {
    reason: "wake up".to_string(),
  });

  let output = handle.result().await.unwrap();
  assert_eq!(output.outcome, "cancelled");
  assert_eq!(handle.query().cancel_reason.as_deref(), Some("wake up"));
}

#[tokio::test(start_paused = true)]
async fn test_finished_instances_can_be_removed() {
  let engine = Engine::new();
  let done = engine
    .start::<Dozer>(Some("d-done".to_string()), 1, ())
    .await
    .unwrap();
  engine
    .start::<Dozer>(Some("d-busy".to_string()), 3600, ())
    .await
    .unwrap();
  engine
    .start::<Dozer>(Some("d-old".to_string()), 1, ())
    .await
    .unwrap();
  done.result().await.unwrap();
  engine.result_json("d-old").await.unwrap();

  assert!(matches!(
    engine.remove("d-busy").await,
    Err(EngineError::StillRunning { .. })
  ));
  engine.remove("d-done").await.unwrap();
  assert!(matches!(
    engine.remove("d-done").await,
    Err(EngineError::NotFound { .. })
  ));
  // handles given out before removal still answer
  assert_eq!(done.query().status, "rested");

  assert_eq!(engine.prune_finished().await, 1);
  let ids: Vec<String> = engine.list().await.into_iter().map(|i| i.instance_id).collect();
  assert_eq!(ids, vec!["d-busy"]);

  engine.cancel("d-busy").await.unwrap();
  engine.result_json("d-busy").await.unwrap();
  assert_eq!(engine.prune_finished().await, 1);
  assert!(engine.list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_signal_after_completion_is_ignored() {
  let engine = Engine::new();
  let handle = engine
    .start::<Turnstile>(Some("t-done".to_string()), input(1, 60), ())
    .await
    .unwrap();
  handle.signal(TurnstileSignal::Push { by: 1 });
  handle.result().await.unwrap();

  engine
    .signal_json("t-done", json!({"signal": "push", "by": 10}))
    .await
    .unwrap();
  handle.signal(TurnstileSignal::Push { by: 10 });
  tokio::time::sleep(Duration::from_secs(1)).await;

  assert_eq!(handle.query().count, 1);
}

#[tokio::test]
async fn test_generated_ids_carry_type_prefix() {
  let engine = Engine::new();
  let handle = engine.start::<Turnstile>(None, input(1, 1), ()).await.unwrap();

  let id = handle.id();
  assert!(id.starts_with("turnstile-"));
  assert_eq!(id.len(), "turnstile-".len() + 8);
  handle.cancel();
}

#[tokio::test]
async fn test_start_errors() {
  let engine = Engine::new();
  engine
    .start::<Turnstile>(Some("dup".to_string()), input(1, 3600), ())
    .await
    .unwrap();

  let err = engine
    .start::<Turnstile>(Some("dup".to_string()), input(1, 3600), ())
    .await
    .err()
    .unwrap();
  assert!(matches!(err, EngineError::AlreadyExists { .. }));

  let err = engine
    .start::<Turnstile>(Some("bad".to_string()), input(0, 3600), ())
    .await
    .err()
    .unwrap();
  assert!(matches!(err, EngineError::Validation(_)));
  assert!(matches!(
    engine.query("bad", STATUS_QUERY).await,
    Err(EngineError::NotFound { .. })
  ));

  engine.cancel("dup").await.unwrap();
}

#[tokio::test]
async fn test_control_surface_errors() {
  let engine = Engine::new();
  engine
    .start::<Turnstile>(Some("t".to_string()), input(1, 3600), ())
    .await
    .unwrap();

  assert!(matches!(
    engine.signal_json("ghost", json!({"signal": "push", "by": 1})).await,
    Err(EngineError::NotFound { .. })
  ));
  assert!(matches!(
    engine.cancel("ghost").await,
    Err(EngineError::NotFound { .. })
  ));
  assert!(matches!(
    engine.result_json("ghost").await,
    Err(EngineError::NotFound { .. })
  ));
  assert!(matches!(
    engine.query("t", "get_everything").await,
    Err(EngineError::UnknownQuery { .. })
  ));
  assert!(matches!(
    engine.signal_json("t", json!({"signal": "teleport"})).await,
    Err(EngineError::InvalidSignal { .. })
  ));
  assert!(matches!(
    engine.handle::<Crasher>("t").await,
    Err(EngineError::TypeMismatch {
      expected: "crasher",
      actual: "turnstile",
      ..
    })
  ));

  let handle = engine.handle::<Turnstile>("t").await.unwrap();
  handle.cancel();
  let result = engine.result_json("t").await.unwrap();
  assert_eq!(result["outcome"], "cancelled");
}

#[tokio::test]
async fn test_panicking_run_is_reported_as_crash() {
  let engine = Engine::new();
  let handle = engine
    .start::<Crasher>(Some("c-1".to_string()), (), ())
    .await
    .unwrap();

  assert!(matches!(
    handle.result().await,
    Err(EngineError::Crashed { .. })
  ));

  let list = engine.list().await;
  assert_eq!(list.len(), 1);
  assert_eq!(list[0].workflow_type, "crasher");
  assert_eq!(list[0].status, InstanceStatus::Crashed);
}

#[tokio::test(start_paused = true)]
async fn test_events_are_emitted() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = Engine::with_notifier(ChannelNotifier::new(tx));
  let handle = engine
    .start::<Turnstile>(Some("t-ev".to_string()), input(1, 60), ())
    .await
    .unwrap();

  handle.signal(TurnstileSignal::Push { by: 0 });
  handle.signal(TurnstileSignal::Push { by: 1 });
  handle.result().await.unwrap();
  tokio::time::sleep(Duration::from_millis(1)).await;

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(events[0], WorkflowEvent::WorkflowStarted { .. }));
  assert!(
    events
      .iter()
      .any(|e| matches!(e, WorkflowEvent::SignalIgnored { .. }))
  );
  assert!(
    events
      .iter()
      .any(|e| matches!(e, WorkflowEvent::SignalApplied { .. }))
  );
  assert!(matches!(
    events.last(),
    Some(WorkflowEvent::WorkflowCompleted { .. })
  ));
}
