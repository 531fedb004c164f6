use crate::notify::{Notification, NotificationSender, NotifyError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Sender that POSTs notifications as JSON to a mail service endpoint
///
/// The body is `{"template": ..., "to": ..., "fields": {...}}`. Any 2xx
/// response counts as delivered.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookSender {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        debug!("Sent {} to {}", notification.template, notification.to);
        Ok(())
    }
}
