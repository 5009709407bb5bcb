use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marshal_runtime::{ActivityContext, ActivityError};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
  /// Operations console.
  Ops,
  /// Mobile app push.
  App,
  Email,
  Sms,
  Security,
}

impl std::fmt::Display for Channel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Channel::Ops => "ops",
      Channel::App => "app",
      Channel::Email => "email",
      Channel::Sms => "sms",
      Channel::Security => "security",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub message: String,
  pub channel: Channel,
  #[serde(default)]
  pub recipients: Vec<String>,
  #[serde(default)]
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Notification {
  pub fn new(channel: Channel, message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      channel,
      recipients: Vec::new(),
      metadata: serde_json::Map::new(),
    }
  }

  pub fn to(mut self, recipients: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.recipients = recipients.into_iter().map(Into::into).collect();
    self
  }

  pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
    self.metadata.insert(key.to_string(), value.into());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationReceipt {
  pub notification_id: String,
  pub sent: bool,
  pub recipients_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
  pub request_type: String,
  pub title: String,
  pub description: String,
  pub data: serde_json::Value,
  pub approvers: Vec<String>,
  pub timeout_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
  pub approval_id: String,
  pub approvers: Vec<String>,
  pub expires_at: DateTime<Utc>,
}

/// Outbound messages to people.
#[async_trait]
pub trait NotificationActivities: Send + Sync {
  async fn send_notification(
    &self,
    ctx: &ActivityContext,
    notification: &Notification,
  ) -> Result<NotificationReceipt, ActivityError>;

  /// Persist an approval request and return its id.
  async fn create_approval_request(
    &self,
    ctx: &ActivityContext,
    request: &ApprovalRequest,
  ) -> Result<ApprovalRecord, ActivityError>;

  async fn send_approval_reminder(
    &self,
    ctx: &ActivityContext,
    approval_id: &str,
    approvers: &[String],
    message: &str,
  ) -> Result<(), ActivityError>;

  /// Progress message for a running task.
  async fn send_task_update(
    &self,
    ctx: &ActivityContext,
    channel: Channel,
    message: &str,
  ) -> Result<(), ActivityError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifications {
  sent: AtomicU64,
}

impl LogNotifications {
  pub fn new() -> Self {
    Self::default()
  }

  /// Messages emitted so far, reminders and task updates included.
  pub fn sent_count(&self) -> u64 {
    self.sent.load(Ordering::Relaxed)
  }

  fn short_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
  }
}

#[async_trait]
impl NotificationActivities for LogNotifications {
  async fn send_notification(
    &self,
    ctx: &ActivityContext,
    notification: &Notification,
  ) -> Result<NotificationReceipt, ActivityError> {
    let notification_id = Self::short_id("notif");
    info!(
      notification_id = %notification_id,
      instance_id = %ctx.instance_id(),
      channel = %notification.channel,
      recipients = ?notification.recipients,
      message = %notification.message,
      "notification_sent"
    );
    self.sent.fetch_add(1, Ordering::Relaxed);
    Ok(NotificationReceipt {
      notification_id,
      sent: true,
      recipients_count: notification.recipients.len(),
    })
  }

  async fn create_approval_request(
    &self,
    _ctx: &ActivityContext,
    request: &ApprovalRequest,
  ) -> Result<ApprovalRecord, ActivityError> {
    let record = ApprovalRecord {
      approval_id: Self::short_id("approval"),
      approvers: request.approvers.clone(),
      expires_at: Utc::now() + chrono::Duration::minutes(i64::from(request.timeout_minutes)),
    };
    info!(
      approval_id = %record.approval_id,
      request_type = %request.request_type,
      title = %request.title,
      "approval_request_created"
    );
    Ok(record)
  }

  async fn send_approval_reminder(
    &self,
    _ctx: &ActivityContext,
    approval_id: &str,
    approvers: &[String],
    message: &str,
  ) -> Result<(), ActivityError> {
    info!(approval_id = %approval_id, approvers = ?approvers, message = %message, "approval_reminder_sent");
    self.sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  async fn send_task_update(
    &self,
    _ctx: &ActivityContext,
    channel: Channel,
    message: &str,
  ) -> Result<(), ActivityError> {
    info!(channel = %channel, message = %message, "task_update_sent");
    self.sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }
}
