//! Workflow-side wrappers for the notification activities shared by every
//! workflow kind. Each runs through [`WorkflowContext::execute_activity`], so
//! signals keep flowing while the call is in progress.

use std::sync::Arc;

use marshal_runtime::{ActivityFailure, ActivityOptions, Workflow, WorkflowContext};

use crate::notification::{
  ApprovalRecord, ApprovalRequest, Channel, Notification, NotificationActivities,
  NotificationReceipt,
};

pub async fn send_notification<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  notifications: &Arc<dyn NotificationActivities>,
  options: &ActivityOptions,
  notification: Notification,
) -> Result<NotificationReceipt, ActivityFailure> {
  let notifications = notifications.clone();
  ctx
    .execute_activity("send_notification", options, move |actx| {
      let notifications = notifications.clone();
      let notification = notification.clone();
      async move { notifications.send_notification(&actx, &notification).await }
    })
    .await
}

pub async fn send_task_update<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  notifications: &Arc<dyn NotificationActivities>,
  options: &ActivityOptions,
  channel: Channel,
  message: String,
) -> Result<(), ActivityFailure> {
  let notifications = notifications.clone();
  ctx
    .execute_activity("send_task_update", options, move |actx| {
      let notifications = notifications.clone();
      let message = message.clone();
      async move {
        notifications
          .send_task_update(&actx, channel, &message)
          .await
      }
    })
    .await
}

pub async fn create_approval_request<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  notifications: &Arc<dyn NotificationActivities>,
  options: &ActivityOptions,
  request: ApprovalRequest,
) -> Result<ApprovalRecord, ActivityFailure> {
  let notifications = notifications.clone();
  ctx
    .execute_activity("create_approval_request", options, move |actx| {
      let notifications = notifications.clone();
      let request = request.clone();
      async move { notifications.create_approval_request(&actx, &request).await }
    })
    .await
}

pub async fn send_approval_reminder<W: Workflow>(
  ctx: &mut WorkflowContext<W>,
  notifications: &Arc<dyn NotificationActivities>,
  options: &ActivityOptions,
  approval_id: String,
  approvers: Vec<String>,
  message: String,
) -> Result<(), ActivityFailure> {
  let notifications = notifications.clone();
  ctx
    .execute_activity("send_approval_reminder", options, move |actx| {
      let notifications = notifications.clone();
      let approval_id = approval_id.clone();
      let approvers = approvers.clone();
      let message = message.clone();
      async move {
        notifications
          .send_approval_reminder(&actx, &approval_id, &approvers, &message)
          .await
      }
    })
    .await
}
