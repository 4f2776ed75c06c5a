use std::sync::Arc;

use anyhow::Result;
use dispatch_service::{
    clients::{gateway::HttpGateway, template::TemplateResolver},
    error::{MediumError, TransportError},
    mediums::{Medium, MissingAddressPolicy, SmsMedium, Transport},
    models::{retry::RetryConfig, template::OutboundMessage},
};
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

use crate::common::{contact, notification_via, seeded_store};

fn quick_retries() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
    }
}

fn sms_message() -> OutboundMessage {
    OutboundMessage {
        notification_id: Uuid::new_v4(),
        medium: "sms".to_string(),
        to: "09120000000".to_string(),
        subject: None,
        body: "Acme: 5 txns".to_string(),
    }
}

/// Test: A 2xx answer yields the gateway's message id
#[tokio::test]
async fn test_gateway_delivers_message() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_partial_json(json!({
            "medium": "sms",
            "to": "09120000000",
            "body": "Acme: 5 txns",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message_id": "gw-123" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(&format!("{}/send", server.uri()), quick_retries())?;
    let message_id = gateway.deliver(&sms_message()).await?;

    assert_eq!(message_id, "gw-123");

    Ok(())
}

/// Test: An accepted message with an empty body still succeeds
#[tokio::test]
async fn test_gateway_accepts_empty_body() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(&server.uri(), quick_retries())?;

    assert_eq!(gateway.deliver(&sms_message()).await?, "");

    Ok(())
}

/// Test: Server errors are retried within the same call
#[tokio::test]
async fn test_gateway_retries_server_errors() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message_id": "gw-9" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(&server.uri(), quick_retries())?;

    assert_eq!(gateway.deliver(&sms_message()).await?, "gw-9");

    Ok(())
}

/// Test: Client errors are not retried
#[tokio::test]
async fn test_gateway_does_not_retry_client_errors() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid number"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(&server.uri(), quick_retries())?;
    let err = gateway.deliver(&sms_message()).await.unwrap_err();

    match err {
        TransportError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "invalid number");
        }
        other => panic!("unexpected error {:?}", other),
    }

    Ok(())
}

/// Test: An unreachable gateway is reported as such after all attempts
#[tokio::test]
async fn test_gateway_unreachable() -> Result<()> {
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let url = format!("http://127.0.0.1:{}/send", port);

    let gateway = HttpGateway::new(&url, quick_retries())?;
    let err = gateway.deliver(&sms_message()).await.unwrap_err();

    assert!(matches!(err, TransportError::Unreachable(_)));

    Ok(())
}

/// Test: The sms medium renders and posts through the HTTP gateway
#[tokio::test]
async fn test_sms_medium_over_gateway() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "medium": "sms",
            "to": "09120000000",
            "body": "Acme: 5 txns, 1000 on 2024-01-01",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message_id": "gw-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = seeded_store().await;
    let sms = SmsMedium::new(
        Arc::new(TemplateResolver::uncached(store)),
        Arc::new(HttpGateway::new(&server.uri(), quick_retries())?),
        MissingAddressPolicy::Fail,
    );

    let notification = notification_via(&["sms"], contact(&[("phone", "09120000000")]));
    let result = sms.send(&notification).await?;

    assert_eq!(result.message, "SMS sent successfully.");

    Ok(())
}

/// Test: A gateway rejection surfaces as a transient medium error
#[tokio::test]
async fn test_sms_medium_wraps_gateway_failure() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = seeded_store().await;
    let sms = SmsMedium::new(
        Arc::new(TemplateResolver::uncached(store)),
        Arc::new(HttpGateway::new(&server.uri(), quick_retries())?),
        MissingAddressPolicy::Fail,
    );

    let notification = notification_via(&["sms"], contact(&[("phone", "09120000000")]));
    let err = sms.send(&notification).await.unwrap_err();

    assert!(matches!(
        err,
        MediumError::Transport {
            source: TransportError::Rejected { status: 500, .. },
            ..
        }
    ));
    assert!(!err.is_permanent());

    Ok(())
}
