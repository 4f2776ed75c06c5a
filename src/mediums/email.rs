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

pub const EMAIL_MEDIUM: &str = "email";
const EMAIL_CHANNEL: &str = "email";
const DEFAULT_SUBJECT: &str = "Notification";

pub struct EmailMedium {
    templates: Arc<TemplateResolver>,
    transport: Arc<dyn Transport>,
    missing_address: MissingAddressPolicy,
}

impl EmailMedium {
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
impl Medium for EmailMedium {
    fn name(&self) -> &str {
        EMAIL_MEDIUM
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryResult, MediumError> {
        let body = render_for(&self.templates, notification, EMAIL_MEDIUM).await?;
        let to = self
            .missing_address
            .apply(notification, EMAIL_MEDIUM, EMAIL_CHANNEL)?;

        let subject = notification
            .context_data
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string();

        let message = OutboundMessage {
            notification_id: notification.id,
            medium: EMAIL_MEDIUM.to_string(),
            to,
            subject: Some(subject),
            body,
        };

        let message_id = self
            .transport
            .deliver(&message)
            .await
            .map_err(|source| MediumError::Transport {
                medium: EMAIL_MEDIUM.to_string(),
                source,
            })?;

        debug!(
            notification_id = %notification.id,
            message_id = %message_id,
            "Email handed to transport"
        );

        Ok(DeliveryResult {
            status: DeliveryStatus::Sent,
            message: "Email sent successfully.".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::{
        error::TransportError, mediums::transport::MockTransport, models::template::Template,
        store::{TemplateStore, memory::MemoryStore},
    };

    async fn resolver_with_template() -> Arc<TemplateResolver> {
        let store = Arc::new(MemoryStore::new());
        store
            .save_template(&Template::new(
                "daily_report",
                "email",
                "Dear {{ merchant_name }}, you had {{ transaction_count }} transactions.",
            ))
            .await
            .unwrap();
        Arc::new(TemplateResolver::uncached(store))
    }

    fn notification(contact: &[(&str, &str)], context: serde_json::Value) -> Notification {
        let context_data: HashMap<String, serde_json::Value> =
            serde_json::from_value(context).unwrap();
        Notification::new(
            "merchant-1".to_string(),
            contact
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            vec!["email".to_string()],
            "daily_report".to_string(),
            context_data,
        )
    }

    #[tokio::test]
    async fn test_email_send_renders_and_delivers() {
        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .withf(|m| {
                m.to == "merchant@example.com"
                    && m.subject.as_deref() == Some("Daily report")
                    && m.body == "Dear Acme, you had 5 transactions."
            })
            .times(1)
            .returning(|_| Ok("msg-1".to_string()));

        let medium = EmailMedium::new(
            resolver_with_template().await,
            Arc::new(transport),
            MissingAddressPolicy::Fail,
        );
        let n = notification(
            &[("email", "merchant@example.com")],
            json!({"merchant_name": "Acme", "transaction_count": 5, "subject": "Daily report"}),
        );

        let result = medium.send(&n).await.unwrap();
        assert_eq!(result.status, DeliveryStatus::Sent);
        assert_eq!(result.message, "Email sent successfully.");
    }

    #[tokio::test]
    async fn test_email_without_address_fails_before_transport() {
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(0);

        let medium = EmailMedium::new(
            resolver_with_template().await,
            Arc::new(transport),
            MissingAddressPolicy::Fail,
        );
        let n = notification(
            &[("phone", "1234567890")],
            json!({"merchant_name": "Acme", "transaction_count": 5}),
        );

        let err = medium.send(&n).await.unwrap_err();
        assert!(matches!(err, MediumError::MissingAddress { .. }));
    }

    #[tokio::test]
    async fn test_email_default_subject() {
        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .withf(|m| m.subject.as_deref() == Some("Notification"))
            .returning(|_| Ok("msg-2".to_string()));

        let medium = EmailMedium::new(
            resolver_with_template().await,
            Arc::new(transport),
            MissingAddressPolicy::Fail,
        );
        let n = notification(
            &[("email", "merchant@example.com")],
            json!({"merchant_name": "Acme", "transaction_count": 5}),
        );

        assert!(medium.send(&n).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_transport_error_is_wrapped() {
        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .returning(|_| Err(TransportError::Unreachable("connection reset".to_string())));

        let medium = EmailMedium::new(
            resolver_with_template().await,
            Arc::new(transport),
            MissingAddressPolicy::Fail,
        );
        let n = notification(
            &[("email", "merchant@example.com")],
            json!({"merchant_name": "Acme", "transaction_count": 5}),
        );

        let err = medium.send(&n).await.unwrap_err();
        assert!(matches!(err, MediumError::Transport { .. }));
        assert!(!err.is_permanent());
    }
}
