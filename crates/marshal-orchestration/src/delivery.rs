use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marshal_activities::{Channel, Notification, ReceiptStatus, RobotTask, floor_number, floor_of};
use marshal_runtime::{SignalOutcome, ValidationError, WaitOutcome, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::deps::OrchestrationDeps;
use crate::steps::{self, Halt, Reservations, Route, STATION};

const DELIVERY_CAPABILITY: &str = "delivery.standard";
const DESTINATION_ACCESS_MINUTES: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryInput {
  /// `floor-N/room`, e.g. `floor-1/room-101`.
  pub pickup_location: String,
  pub delivery_location: String,
  pub item_description: String,
  pub recipient_id: String,
  #[serde(default)]
  pub sender_id: Option<String>,
  #[serde(default)]
  pub robot_id: Option<String>,
  #[serde(default = "steps::default_priority")]
  pub priority: u8,
  #[serde(default)]
  pub require_signature: bool,
  #[serde(default)]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
  #[default]
  Pending,
  AssigningRobot,
  GoingToPickup,
  AtPickupWaiting,
  GoingToDelivery,
  AtDeliveryWaiting,
  Completing,
  Completed,
  Cancelled,
  Failed,
}

impl DeliveryStatus {
  fn is_terminal(self) -> bool {
    matches!(
      self,
      DeliveryStatus::Completed | DeliveryStatus::Cancelled | DeliveryStatus::Failed
    )
  }

  fn as_str(self) -> &'static str {
    match self {
      DeliveryStatus::Pending => "pending",
      DeliveryStatus::AssigningRobot => "assigning_robot",
      DeliveryStatus::GoingToPickup => "going_to_pickup",
      DeliveryStatus::AtPickupWaiting => "at_pickup_waiting",
      DeliveryStatus::GoingToDelivery => "going_to_delivery",
      DeliveryStatus::AtDeliveryWaiting => "at_delivery_waiting",
      DeliveryStatus::Completing => "completing",
      DeliveryStatus::Completed => "completed",
      DeliveryStatus::Cancelled => "cancelled",
      DeliveryStatus::Failed => "failed",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryState {
  pub status: DeliveryStatus,
  pub robot_id: Option<String>,
  pub pickup_completed: bool,
  pub delivery_completed: bool,
  pub signature: Option<String>,
  pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum DeliverySignal {
  ConfirmPickup,
  ConfirmDelivery {
    #[serde(default)]
    signature: Option<String>,
  },
  Cancel {
    #[serde(default)]
    reason: Option<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
  pub success: bool,
  pub status: DeliveryStatus,
  pub robot_id: Option<String>,
  pub pickup_time: Option<DateTime<Utc>>,
  pub delivery_time: Option<DateTime<Utc>>,
  pub signature: Option<String>,
  pub message: String,
  pub total_duration_minutes: f64,
}

#[derive(Debug, Default)]
struct Handoffs {
  pickup: Option<DateTime<Utc>>,
  delivery: Option<DateTime<Utc>>,
}

/// Carry an item from a pickup point to a recipient.
pub struct DeliveryWorkflow;

impl DeliveryWorkflow {
  fn enter(ctx: &mut WorkflowContext<Self>, status: DeliveryStatus) {
    info!(status = status.as_str(), "delivery_phase");
    ctx.update(|s| s.status = status);
  }

  /// Wait for a confirmation; no answer within `window` counts as confirmed.
  async fn await_confirmation(
    ctx: &mut WorkflowContext<Self>,
    window: Duration,
    confirmed: fn(&DeliveryState) -> bool,
    auto_confirm: fn(&mut DeliveryState),
  ) -> Result<(), Halt> {
    match ctx.wait_condition(confirmed, window).await {
      WaitOutcome::Satisfied => Ok(()),
      WaitOutcome::TimedOut => {
        info!(status = ctx.state().status.as_str(), "confirmation_assumed");
        ctx.update(auto_confirm);
        Ok(())
      }
      WaitOutcome::Cancelled => Err(Halt::Cancelled),
    }
  }

  async fn execute(
    ctx: &mut WorkflowContext<Self>,
    deps: &OrchestrationDeps,
    input: &DeliveryInput,
    reservations: &mut Reservations,
    handoffs: &mut Handoffs,
  ) -> Result<(), Halt> {
    let pickup_floor = floor_number(&input.pickup_location);

    Self::enter(ctx, DeliveryStatus::AssigningRobot);
    let lease = steps::acquire_robot(
      ctx,
      deps,
      DELIVERY_CAPABILITY,
      input.robot_id.as_deref(),
      pickup_floor,
    )
    .await?;
    reservations.lease = Some(lease.clone());
    let robot_id = lease.robot_id.clone();
    ctx.update(|s| s.robot_id = Some(robot_id.clone()));

    let task = RobotTask {
      robot_id: robot_id.clone(),
      lease_id: lease.lease_id.clone(),
      task_type: "delivery".to_string(),
      parameters: json!({
        "pickup": input.pickup_location,
        "delivery": input.delivery_location,
        "item": input.item_description,
        "notes": input.notes,
      }),
      priority: input.priority,
    };
    let receipt = steps::assign_task(ctx, deps, task).await?;
    if receipt.status != ReceiptStatus::Assigned {
      return Err(Halt::Failed(format!(
        "Task assignment failed: {}",
        receipt.reason.as_deref().unwrap_or("unknown")
      )));
    }

    if let Some(sender) = &input.sender_id {
      let started = Notification::new(
        Channel::App,
        format!("Delivery of {} has started", input.item_description),
      )
      .to([sender.clone()])
      .with("robot_id", robot_id.clone())
      .with("pickup", input.pickup_location.clone())
      .with("delivery", input.delivery_location.clone());
      steps::announce(ctx, deps, started).await;
    }
    steps::checkpoint(ctx)?;

    Self::enter(ctx, DeliveryStatus::GoingToPickup);
    let location = steps::robot_location(ctx, deps, &robot_id).await?;
    let to_pickup = Route {
      robot_id: &robot_id,
      from: STATION,
      from_floor: location.floor,
      to: &input.pickup_location,
      zone: None,
    };
    steps::prepare_route(ctx, deps, reservations, to_pickup).await?;
    steps::checkpoint(ctx)?;

    Self::enter(ctx, DeliveryStatus::AtPickupWaiting);
    if let Some(sender) = &input.sender_id {
      let arrived = Notification::new(
        Channel::App,
        format!("Robot {robot_id} is waiting at {}", input.pickup_location),
      )
      .to([sender.clone()]);
      steps::announce(ctx, deps, arrived).await;
    }
    let pickup_window = Duration::from_millis(deps.delivery.pickup_window_ms);
    Self::await_confirmation(ctx, pickup_window, |s| s.pickup_completed, |s| {
      s.pickup_completed = true;
    })
    .await?;
    handoffs.pickup = Some(ctx.now());
    steps::release_access(ctx, deps, reservations).await;
    steps::checkpoint(ctx)?;

    Self::enter(ctx, DeliveryStatus::GoingToDelivery);
    let to_recipient = Route {
      robot_id: &robot_id,
      from: &input.pickup_location,
      from_floor: pickup_floor,
      to: &input.delivery_location,
      zone: Some((
        floor_of(&input.delivery_location).to_string(),
        DESTINATION_ACCESS_MINUTES,
      )),
    };
    steps::prepare_route(ctx, deps, reservations, to_recipient).await?;
    steps::checkpoint(ctx)?;

    Self::enter(ctx, DeliveryStatus::AtDeliveryWaiting);
    let arrived = Notification::new(
      Channel::App,
      format!("Robot {robot_id} has arrived with {}", input.item_description),
    )
    .to([input.recipient_id.clone()])
    .with("location", input.delivery_location.clone());
    steps::announce(ctx, deps, arrived).await;

    let delivery_window = Duration::from_millis(deps.delivery.delivery_window_ms);
    Self::await_confirmation(ctx, delivery_window, |s| s.delivery_completed, |s| {
      s.delivery_completed = true;
    })
    .await?;
    handoffs.delivery = Some(ctx.now());

    if input.require_signature && ctx.state().signature.is_none() {
      warn!(recipient_id = %input.recipient_id, "delivery_unsigned");
    }
    Self::enter(ctx, DeliveryStatus::Completing);
    Ok(())
  }
}

#[async_trait]
impl Workflow for DeliveryWorkflow {
  const TYPE: &'static str = "delivery";
  type Input = DeliveryInput;
  type Output = DeliveryResult;
  type State = DeliveryState;
  type Signal = DeliverySignal;
  type Deps = OrchestrationDeps;

  fn validate(input: &DeliveryInput) -> Result<(), ValidationError> {
    for (field, value) in [
      ("pickup_location", &input.pickup_location),
      ("delivery_location", &input.delivery_location),
      ("recipient_id", &input.recipient_id),
    ] {
      if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
      }
    }
    if !(1..=5).contains(&input.priority) {
      return Err(ValidationError::new("priority", "must be between 1 and 5"));
    }
    Ok(())
  }

  fn on_signal(state: &mut DeliveryState, signal: DeliverySignal) -> SignalOutcome {
    if state.status.is_terminal() {
      return SignalOutcome::Ignored;
    }
    match signal {
      DeliverySignal::ConfirmPickup if !state.pickup_completed => {
        state.pickup_completed = true;
        SignalOutcome::Applied
      }
      DeliverySignal::ConfirmDelivery { signature } if !state.delivery_completed => {
        state.delivery_completed = true;
        state.signature = signature;
        SignalOutcome::Applied
      }
      DeliverySignal::Cancel { reason } if state.cancel_reason.is_none() => {
        state.cancel_reason = Some(reason.unwrap_or_else(|| "cancelled by user".to_string()));
        SignalOutcome::Cancel
      }
      _ => SignalOutcome::Ignored,
    }
  }

  async fn run(
    ctx: &mut WorkflowContext<Self>,
    deps: OrchestrationDeps,
    input: DeliveryInput,
  ) -> DeliveryResult {
    info!(
      pickup = %input.pickup_location,
      delivery = %input.delivery_location,
      recipient_id = %input.recipient_id,
      "delivery_started"
    );

    let mut reservations = Reservations::default();
    let mut handoffs = Handoffs::default();
    let outcome = steps::guarded(Self::execute(
      ctx,
      &deps,
      &input,
      &mut reservations,
      &mut handoffs,
    ))
    .await;
    let interrupted_at = ctx.state().status;

    let success = outcome.is_ok();
    steps::teardown(ctx, &deps, &mut reservations, success).await;

    let (status, message) = match outcome {
      Ok(()) => (
        DeliveryStatus::Completed,
        "Delivery completed successfully".to_string(),
      ),
      Err(Halt::Cancelled) => {
        let reason = ctx
          .state()
          .cancel_reason
          .clone()
          .unwrap_or_else(|| "cancelled by user".to_string());
        (
          DeliveryStatus::Cancelled,
          format!("Delivery cancelled during {}: {reason}", interrupted_at.as_str()),
        )
      }
      Err(Halt::Failed(message)) => (DeliveryStatus::Failed, format!("Delivery failed: {message}")),
    };

    let robot_id = ctx.state().robot_id.clone();
    let report = if success {
      Notification::new(
        Channel::App,
        format!("Delivered: {}", input.item_description),
      )
      .to([input.recipient_id.clone()])
      .with("robot_id", robot_id.clone())
    } else {
      Notification::new(Channel::Ops, message.clone())
        .with("robot_id", robot_id.clone())
        .with("recipient_id", input.recipient_id.clone())
    };
    steps::report(ctx, &deps, report).await;

    ctx.update(|s| s.status = status);
    info!(status = status.as_str(), robot_id = ?robot_id, "delivery_finished");

    DeliveryResult {
      success,
      status,
      robot_id,
      pickup_time: handoffs.pickup,
      delivery_time: handoffs.delivery,
      signature: ctx.state().signature.clone(),
      message,
      total_duration_minutes: ctx.elapsed().as_secs_f64() / 60.0,
    }
  }
}
