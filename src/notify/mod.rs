//! Notification delivery
//!
//! Jobs describe a notification as a template name, a recipient and a set of
//! template fields. A [`NotificationSender`] renders and delivers it; the
//! only thing callers learn is success or failure.

mod log;
mod webhook;

pub use self::log::LogSender;
pub use webhook::WebhookSender;

use crate::config::{NotifyConfig, SenderKind};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint returned status {0}")]
    Status(u16),

    #[error("Notification sender is not configured: {0}")]
    Config(String),
}

/// A templated message for one recipient
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub template: String,
    pub to: String,
    pub fields: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            to: to.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a template field
    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

/// Delivers notifications
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Builds the sender selected in the configuration
pub fn build_sender(config: &NotifyConfig) -> Result<Arc<dyn NotificationSender>, NotifyError> {
    match config.sender {
        SenderKind::Log => Ok(Arc::new(LogSender)),
        SenderKind::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| NotifyError::Config("webhook-url is missing".to_string()))?;
            Ok(Arc::new(WebhookSender::new(url)?))
        }
    }
}
