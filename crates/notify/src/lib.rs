//! Operator and customer alerting.
//!
//! Workers emit alerts through the [`Notifier`] trait so delivery stays
//! pluggable: the console notifier is always safe to run, the Slack
//! notifier posts to an incoming webhook when one is configured.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Alert severity; maps onto delivery styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    /// Attachment color used by the Slack payload.
    fn color(self) -> &'static str {
        match self {
            Severity::Info => "#36a64f",
            Severity::Warning => "#ffcc00",
            Severity::Error => "#ff0000",
        }
    }
}

/// Delivery failures. Alerting is best-effort everywhere it is called;
/// callers log and continue.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notify: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notify: webhook returned status {0}")]
    Status(u16),
}

/// Alert sink. `subject_id` identifies the zone or customer the alert is
/// about.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(
        &self,
        subject_id: &str,
        severity: Severity,
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// Writes alerts to the process log. Default sink when no webhook is
/// configured.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_alert(
        &self,
        subject_id: &str,
        severity: Severity,
        message: &str,
    ) -> Result<(), NotifyError> {
        match severity {
            Severity::Error => {
                tracing::error!(subject_id, alert = message, "alert");
            }
            Severity::Warning => {
                tracing::warn!(subject_id, alert = message, "alert");
            }
            Severity::Info => {
                tracing::info!(subject_id, alert = message, "alert");
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SlackPayload {
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SlackAttachment>,
}

#[derive(Serialize)]
struct SlackAttachment {
    color: &'static str,
    title: String,
    text: String,
    footer: &'static str,
    ts: i64,
}

/// Posts alerts to a Slack incoming webhook.
pub struct SlackNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    fn payload(subject_id: &str, severity: Severity, message: &str) -> SlackPayload {
        SlackPayload {
            text: format!("logvault alert: {subject_id}"),
            attachments: vec![SlackAttachment {
                color: severity.color(),
                title: format!("[{}] alert", severity.as_str()),
                text: message.to_string(),
                footer: "logvault worker",
                ts: chrono::Utc::now().timestamp(),
            }],
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send_alert(
        &self,
        subject_id: &str,
        severity: Severity,
        message: &str,
    ) -> Result<(), NotifyError> {
        if self.webhook_url.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&Self::payload(subject_id, severity, message))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_expected_colors() {
        assert_eq!(Severity::Info.color(), "#36a64f");
        assert_eq!(Severity::Warning.color(), "#ffcc00");
        assert_eq!(Severity::Error.color(), "#ff0000");
    }

    #[test]
    fn slack_payload_carries_subject_and_message() {
        let payload =
            SlackNotifier::payload("zone-123", Severity::Warning, "quota exceeded");

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["text"], "logvault alert: zone-123");
        assert_eq!(value["attachments"][0]["title"], "[warning] alert");
        assert_eq!(value["attachments"][0]["text"], "quota exceeded");
        assert_eq!(value["attachments"][0]["color"], "#ffcc00");
    }
}
