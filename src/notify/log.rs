use crate::notify::{Notification, NotificationSender, NotifyError};
use async_trait::async_trait;
use tracing::info;

/// Sender that only logs notifications, used in development
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            template = %notification.template,
            to = %notification.to,
            fields = ?notification.fields,
            "Notification"
        );
        Ok(())
    }
}
