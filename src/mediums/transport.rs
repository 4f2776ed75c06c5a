use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::{error::TransportError, models::template::OutboundMessage};

/// Last hop of a medium: hands a rendered message to the outside world and
/// returns the provider's message id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<String, TransportError>;
}

/// Simulated transport that only logs the message. Always succeeds.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<String, TransportError> {
        let message_id = Uuid::new_v4().to_string();

        info!(
            medium = %message.medium,
            notification_id = %message.notification_id,
            to = %message.to,
            subject = ?message.subject,
            message_id = %message_id,
            body = %message.body,
            "Simulated delivery"
        );

        Ok(message_id)
    }
}
