//! Marshal Approval
//!
//! Human decision gates. [`ApprovalWorkflow`] collects one decision from a set
//! of approvers, reminding them on a schedule and resolving to `timeout` when
//! nobody answers. [`MultiStageApprovalWorkflow`] chains independent stages and
//! stops at the first stage that is not approved.
//!
//! Decisions arrive as signals and are write-once: the first one wins.

mod deps;
mod multi_stage;
mod single;

pub use deps::ApprovalDeps;
pub use multi_stage::{
  MultiStageApprovalWorkflow, MultiStageInput, MultiStageResult, MultiStageSignal,
  MultiStageState, MultiStageStatus, StageConfig, StageDecision, StageResult,
};
pub use single::{
  ApprovalDecision, ApprovalInput, ApprovalResult, ApprovalSignal, ApprovalState, ApprovalStatus,
  ApprovalWorkflow,
};
