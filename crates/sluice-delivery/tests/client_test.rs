//! Delivery client behavior against a mock downstream endpoint.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use sluice_core::EventId;
use sluice_delivery::{ClientConfig, DeliveryClient, DeliveryError, DeliveryRequest};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn request(url: String) -> DeliveryRequest {
    let mut headers = HashMap::new();
    headers.insert("X-Request-Id".to_string(), "req-42".to_string());

    DeliveryRequest {
        event_id: EventId::from("evt_1"),
        url,
        attempt_number: 1,
        body: Bytes::from_static(b"{\"event_type\":\"order.created\"}"),
        signature: Some("ab".repeat(32)),
        headers,
    }
}

#[tokio::test]
async fn success_returns_response() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let response = client.deliver(request(format!("{}/hook", server.uri()))).await.unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, "OK");
}

#[tokio::test]
async fn metadata_and_signature_headers_sent() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::header("X-Sluice-Event-Id", "evt_1"))
        .and(matchers::header("X-Sluice-Delivery-Attempt", "1"))
        .and(matchers::header("X-Signature", format!("sha256={}", "ab".repeat(32)).as_str()))
        .and(matchers::header("X-Request-Id", "req-42"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    assert!(client.deliver(request(server.uri())).await.is_ok());
}

#[tokio::test]
async fn client_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let err = client.deliver(request(server.uri())).await.unwrap_err();

    assert!(matches!(err, DeliveryError::ClientError { status: 404 }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let err = client.deliver(request(server.uri())).await.unwrap_err();

    assert!(matches!(err, DeliveryError::ServerError { status: 503 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let err = client.deliver(request(server.uri())).await.unwrap_err();

    assert!(matches!(err, DeliveryError::RateLimited { .. }));
    assert_eq!(err.retry_after_seconds(), Some(30));
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = ClientConfig { timeout: Duration::from_millis(200), ..ClientConfig::default() };
    let client = DeliveryClient::new(config).unwrap();
    let err = client.deliver(request(server.uri())).await.unwrap_err();

    assert!(matches!(err, DeliveryError::Timeout(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn connection_refused_is_network_error() {
    // Port 1 is never listening.
    let client = DeliveryClient::with_defaults().unwrap();
    let err = client.deliver(request("http://127.0.0.1:1/hook".to_string())).await.unwrap_err();

    assert!(matches!(err, DeliveryError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unsigned_request_omits_signature_header() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let mut req = request(server.uri());
    req.signature = None;
    assert!(client.deliver(req).await.is_ok());

    let received = &server.received_requests().await.unwrap()[0];
    assert!(!received.headers.contains_key("x-signature"));
}
