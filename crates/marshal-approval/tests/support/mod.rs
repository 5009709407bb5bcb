#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use marshal_activities::{
  ApprovalRecord, ApprovalRequest, Channel, Notification, NotificationActivities,
  NotificationReceipt,
};
use marshal_approval::ApprovalDeps;
use marshal_runtime::{ActivityContext, ActivityError};

/// Records every call; optionally refuses to create approval requests.
#[derive(Default)]
pub struct RecordingNotifications {
  pub notifications: Mutex<Vec<Notification>>,
  pub requests: Mutex<Vec<ApprovalRequest>>,
  pub reminders: AtomicU32,
  pub fail_create: bool,
}

impl RecordingNotifications {
  pub fn failing_create() -> Self {
    Self {
      fail_create: true,
      ..Default::default()
    }
  }

  pub fn reminder_count(&self) -> u32 {
    self.reminders.load(Ordering::SeqCst)
  }

  pub fn sent(&self) -> Vec<Notification> {
    self.notifications.lock().unwrap().clone()
  }

  pub fn request_titles(&self) -> Vec<String> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| r.title.clone())
      .collect()
  }
}

#[async_trait]
impl NotificationActivities for RecordingNotifications {
  async fn send_notification(
    &self,
    _ctx: &ActivityContext,
    notification: &Notification,
  ) -> Result<NotificationReceipt, ActivityError> {
    self.notifications.lock().unwrap().push(notification.clone());
    Ok(NotificationReceipt {
      notification_id: "notif-test".to_string(),
      sent: true,
      recipients_count: notification.recipients.len(),
    })
  }

  async fn create_approval_request(
    &self,
    _ctx: &ActivityContext,
    request: &ApprovalRequest,
  ) -> Result<ApprovalRecord, ActivityError> {
    if self.fail_create {
      return Err(ActivityError::fatal("approval store unavailable"));
    }
    let mut requests = self.requests.lock().unwrap();
    requests.push(request.clone());
    Ok(ApprovalRecord {
      approval_id: format!("approval-{}", requests.len()),
      approvers: request.approvers.clone(),
      expires_at: chrono::Utc::now(),
    })
  }

  async fn send_approval_reminder(
    &self,
    _ctx: &ActivityContext,
    _approval_id: &str,
    _approvers: &[String],
    _message: &str,
  ) -> Result<(), ActivityError> {
    self.reminders.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn send_task_update(
    &self,
    _ctx: &ActivityContext,
    _channel: Channel,
    _message: &str,
  ) -> Result<(), ActivityError> {
    Ok(())
  }
}

pub fn deps(notifications: &Arc<RecordingNotifications>) -> ApprovalDeps {
  let notifications: Arc<dyn NotificationActivities> = notifications.clone();
  ApprovalDeps::new(notifications)
}
