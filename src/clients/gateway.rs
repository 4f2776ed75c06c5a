use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    error::TransportError,
    mediums::Transport,
    models::{retry::RetryConfig, template::OutboundMessage},
    utils::retry_with_backoff,
};

/// Transport that posts rendered messages as JSON to an HTTP gateway
/// (an SMTP relay or SMS provider bridge).
pub struct HttpGateway {
    http_client: Client,
    url: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    message_id: Option<String>,
}

impl HttpGateway {
    pub fn new(url: &str, retry_config: RetryConfig) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(url, "HTTP gateway transport initialized");

        Ok(Self {
            http_client,
            url: url.to_string(),
            retry_config,
        })
    }

    async fn deliver_once(
        http_client: &Client,
        url: &str,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        let response = http_client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // Some gateways answer 202 with an empty body.
        let message_id = response
            .json::<GatewayResponse>()
            .await
            .ok()
            .and_then(|r| r.message_id)
            .unwrap_or_default();

        Ok(message_id)
    }
}

#[async_trait]
impl Transport for HttpGateway {
    async fn deliver(&self, message: &OutboundMessage) -> Result<String, TransportError> {
        debug!(
            medium = %message.medium,
            notification_id = %message.notification_id,
            url = %self.url,
            "Posting message to gateway"
        );

        retry_with_backoff(&self.retry_config, TransportError::is_transient, || {
            Self::deliver_once(&self.http_client, &self.url, message)
        })
        .await
    }
}
