use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    clients::template::TemplateResolver,
    error::MediumError,
    mediums::{Medium, MissingAddressPolicy, Transport, render_for},
    models::{
        notification::Notification,
        status::DeliveryStatus,
        template::{DeliveryResult, OutboundMessage},
    },
};

pub const SMS_MEDIUM: &str = "sms";
const SMS_CHANNEL: &str = "phone";

pub struct SmsMedium {
    templates: Arc<TemplateResolver>,
    transport: Arc<dyn Transport>,
    missing_address: MissingAddressPolicy,
}

impl SmsMedium {
    pub fn new(
        templates: Arc<TemplateResolver>,
        transport: Arc<dyn Transport>,
        missing_address: MissingAddressPolicy,
    ) -> Self {
        Self {
            templates,
            transport,
            missing_address,
        }
    }
}

#[async_trait]
impl Medium for SmsMedium {
    fn name(&self) -> &str {
        SMS_MEDIUM
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryResult, MediumError> {
        let body = render_for(&self.templates, notification, SMS_MEDIUM).await?;
        let to = self
            .missing_address
            .apply(notification, SMS_MEDIUM, SMS_CHANNEL)?;

        let message = OutboundMessage {
            notification_id: notification.id,
            medium: SMS_MEDIUM.to_string(),
            to,
            subject: None,
            body,
        };

        let message_id = self
            .transport
            .deliver(&message)
            .await
            .map_err(|source| MediumError::Transport {
                medium: SMS_MEDIUM.to_string(),
                source,
            })?;

        debug!(
            notification_id = %notification.id,
            message_id = %message_id,
            "SMS handed to transport"
        );

        Ok(DeliveryResult {
            status: DeliveryStatus::Sent,
            message: "SMS sent successfully.".to_string(),
        })
    }
}
