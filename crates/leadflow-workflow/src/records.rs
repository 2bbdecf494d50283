//! Shared record types: templates, usage records, notifications.

use serde::{Deserialize, Serialize};

/// An HTML template used at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub version: u32,
    pub html_content: String,
    #[serde(default)]
    pub style_description: String,
}

/// One billing record per model call. Writes are best-effort: a failure to
/// record usage never fails the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub usage_id: String,
    pub tenant_id: String,
    pub job_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub service_type: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Notification row surfaced to the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Unix-seconds expiry (90 days out).
    pub ttl: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_resource_type: Option<String>,
}

impl Notification {
    /// 90-day retention, matching the notifications table TTL.
    const TTL_SECONDS: i64 = 90 * 24 * 60 * 60;

    pub fn new(
        tenant_id: impl Into<String>,
        notification_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            notification_id: format!("notif_{}", uuid::Uuid::new_v4().simple()),
            tenant_id: tenant_id.into(),
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            read: false,
            created_at: now,
            ttl: now.timestamp() + Self::TTL_SECONDS,
            related_resource_id: None,
            related_resource_type: None,
        }
    }

    pub fn about(mut self, resource_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.related_resource_id = Some(resource_id.into());
        self.related_resource_type = Some(resource_type.into());
        self
    }
}
