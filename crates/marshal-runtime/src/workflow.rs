use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::WorkflowContext;
use crate::error::ValidationError;

/// Name of the query every workflow answers with its state snapshot.
pub const STATUS_QUERY: &str = "get_status";

/// What a signal handler did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
  Applied,
  /// Stale or duplicate; state untouched.
  Ignored,
  /// State updated and the instance should stop at its next boundary.
  Cancel,
}

/// A durable state machine.
///
/// `State` is owned by the run timeline through its [`WorkflowContext`].
/// Signals reach it only through [`Workflow::on_signal`], applied one at a
/// time while the timeline is suspended, and queries read the last published
/// snapshot. Nothing else shares it, so it needs no locking.
///
/// `run` must read time only through the context and must always return an
/// `Output`; failures are expressed in the output, not as errors.
#[async_trait]
pub trait Workflow: Sized + Send + Sync + 'static {
  /// Type tag, also the prefix of generated instance ids.
  const TYPE: &'static str;

  type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
  type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
  type State: Default + Clone + Serialize + Send + Sync + 'static;
  /// Closed set of signals, deserialized from `{"signal": "<name>", ...}`.
  type Signal: DeserializeOwned + Debug + Send + 'static;
  /// Collaborators handed to `run` (activity implementations, settings).
  type Deps: Clone + Send + Sync + 'static;

  /// Reject malformed input before an instance is created.
  fn validate(_input: &Self::Input) -> Result<(), ValidationError> {
    Ok(())
  }

  fn on_signal(state: &mut Self::State, signal: Self::Signal) -> SignalOutcome;

  async fn run(
    ctx: &mut WorkflowContext<Self>,
    deps: Self::Deps,
    input: Self::Input,
  ) -> Self::Output;
}
