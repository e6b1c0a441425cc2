//! Completion notifications to the owning admin
//!
//! The API layer owns live admin connections; workers reach it through a
//! webhook. Delivery is fire-and-forget from the pipeline's point of view:
//! callers log a failure and move on.

use crate::config::NotificationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, admin_id: Uuid, message: &str) -> Result<()>;
}

#[derive(Serialize)]
struct NotificationEvent<'a> {
    admin_id: Uuid,
    message: &'a str,
}

/// Posts `{"admin_id", "message"}` to the configured URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_notification(&self, admin_id: Uuid, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&NotificationEvent { admin_id, message })
            .send()
            .await
            .map_err(|e| AppError::NotificationError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::NotificationError {
                message: format!("Webhook returned {}", response.status()),
            });
        }

        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(&self, admin_id: Uuid, message: &str) -> Result<()> {
        info!(admin_id = %admin_id, message, "Notification");
        Ok(())
    }
}

/// Records every notification, for tests
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records calls but reports each one as failed
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(Uuid, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, admin_id: Uuid, message: &str) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((admin_id, message.to_string()));
        }
        if self.fail {
            return Err(AppError::NotificationError {
                message: "notification endpoint unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Create the notifier described by configuration
pub fn create_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => {
            info!("No notification webhook configured, notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_fallback() {
        let notifier = create_notifier(&NotificationConfig::default()).unwrap();
        tokio_test::assert_ok!(notifier.send_notification(Uuid::new_v4(), "done").await);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/notify", Duration::from_secs(1)).unwrap();
        let err = notifier.send_notification(Uuid::new_v4(), "done").await.unwrap_err();
        assert!(matches!(err, AppError::NotificationError { .. }));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::failing();
        let admin = Uuid::new_v4();
        assert!(notifier.send_notification(admin, "done").await.is_err());
        assert_eq!(notifier.sent(), vec![(admin, "done".to_string())]);
    }
}
