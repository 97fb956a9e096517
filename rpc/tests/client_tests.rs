//! `RpcClient` against a mock peer.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use concord_core::correlation::CorrelationId;
use concord_core::response::ValidationMode;
use concord_rpc::token::ServiceTokenConfig;
use concord_rpc::{CallOptions, RpcClient, RpcClientConfig, RpcError, ServiceTokenIssuer, TypedSchema};
use concord_runtime::RetryPolicy;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "test-signing-secret";

#[derive(Debug, Deserialize, PartialEq)]
struct Invoice {
    id: u64,
    amount_cents: u64,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .backoff_schedule(vec![Duration::from_millis(10), Duration::from_millis(20)])
        .build()
}

fn config(server: &MockServer) -> RpcClientConfig {
    RpcClientConfig::default()
        .with_base_url(server.uri())
        .with_signing_secret(SECRET)
        .with_retry(fast_retry())
}

fn client(server: &MockServer) -> RpcClient {
    RpcClient::new(config(server)).unwrap()
}

fn header_value(request: &wiremock::Request, name: &str) -> String {
    request
        .headers
        .get(name)
        .expect("header present")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn server_errors_retry_then_surface_last_error() {
    concord_testing::init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/invoices/1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).get("/invoices/1", CallOptions::new()).await.unwrap_err();

    match err {
        RpcError::Server { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        },
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/invoices/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such invoice"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get("/invoices/404", CallOptions::new()).await.unwrap_err();

    assert!(matches!(err, RpcError::Client { status: 404, .. }));
    assert_eq!(err.public_message(), "upstream request rejected");
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "up"})))
        .mount(&server)
        .await;

    let value = client(&server).get("/health", CallOptions::new()).await.unwrap();

    assert_eq!(value, json!({"status": "up"}));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn every_attempt_carries_fresh_credentials_and_same_correlation_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("content-type", "application/json"))
        .and(header_exists("authorization"))
        .and(header_exists("x-correlation-id"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let correlation_id = CorrelationId::new();
    let _ = client(&server)
        .get("/x", CallOptions::new().correlation_id(correlation_id.clone()))
        .await;

    let requests = server.received_requests().await.unwrap();
    let issuer = ServiceTokenIssuer::new(&ServiceTokenConfig::with_secret(SECRET));
    let mut token_ids = Vec::new();
    for request in &requests {
        assert_eq!(header_value(request, "x-correlation-id"), correlation_id.to_string());

        let auth = header_value(request, "authorization");
        let token = auth.strip_prefix("Bearer ").expect("bearer scheme");
        let claims = issuer.verify(token).unwrap();
        assert_eq!(claims.sub, "service");
        assert_eq!(claims.exp - claims.iat, 30);
        token_ids.push(claims.jti);
    }

    token_ids.sort();
    token_ids.dedup();
    assert_eq!(token_ids.len(), 3);
}

#[tokio::test]
async fn correlation_id_is_generated_when_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    client(&server).get("/x", CallOptions::new()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let sent = header_value(&requests[0], "x-correlation-id");
    assert!(Uuid::parse_str(&sent).is_ok());
}

#[tokio::test]
async fn opaque_upstream_correlation_id_is_forwarded_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-correlation-id", "req-7f3a-upstream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let inbound = CorrelationId::from_header(Some("req-7f3a-upstream"));
    client(&server)
        .get("/x", CallOptions::new().correlation_id(inbound))
        .await
        .unwrap();
}

#[tokio::test]
async fn extra_headers_do_not_duplicate_client_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-tenant", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let correlation_id = CorrelationId::new();
    client(&server)
        .get(
            "/x",
            CallOptions::new()
                .correlation_id(correlation_id.clone())
                .header("X-Correlation-Id", "spoofed")
                .header("Authorization", "Bearer stolen")
                .header("x-tenant", "acme"),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let correlation: Vec<_> = requests[0].headers.get_all("x-correlation-id").iter().collect();
    assert_eq!(correlation.len(), 1);
    assert_eq!(correlation[0].to_str().unwrap(), correlation_id.as_str());
    assert_eq!(requests[0].headers.get_all("authorization").iter().count(), 1);
    assert_ne!(header_value(&requests[0], "authorization"), "Bearer stolen");
}

#[tokio::test]
async fn enveloped_responses_are_unwrapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/invoices/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "data": {"ok": true, "data": {"id": 7, "amount_cents": 1200}},
            "timestamp": "2024-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let invoice: Invoice = client(&server)
        .call_as(reqwest::Method::GET, "/invoices/7", None, CallOptions::new())
        .await
        .unwrap();

    assert_eq!(invoice, Invoice { id: 7, amount_cents: 1200 });
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .and(body_json(json!({"customer_id": 3})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9, "amount_cents": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server)
        .post("/invoices", &json!({"customer_id": 3}), CallOptions::new())
        .await
        .unwrap();

    assert_eq!(value["id"], 9);
}

#[tokio::test]
async fn strict_mode_fails_on_schema_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "data": {"id": 7}})))
        .mount(&server)
        .await;

    let err = client(&server)
        .get("/invoices/7", CallOptions::new().validator(TypedSchema::<Invoice>::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::SchemaMismatch(_)));
}

#[tokio::test]
async fn lenient_mode_returns_unvalidated_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "data": {"id": 7}})))
        .mount(&server)
        .await;
    let client =
        RpcClient::new(config(&server).with_validation_mode(ValidationMode::Lenient)).unwrap();

    let value = client
        .get("/invoices/7", CallOptions::new().validator(TypedSchema::<Invoice>::new()))
        .await
        .unwrap();

    assert_eq!(value, json!({"id": 7}));
}

#[tokio::test]
async fn deadline_beats_remaining_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let slow_backoff = RetryPolicy::builder()
        .max_retries(2)
        .backoff_schedule(vec![Duration::from_secs(5)])
        .build();
    let client = RpcClient::new(config(&server).with_retry(slow_backoff)).unwrap();

    let err = client
        .get("/x", CallOptions::new().timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Timeout(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn slow_peer_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .get("/slow", CallOptions::new().timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Timeout(_)));
    assert_eq!(err.public_message(), "upstream service timed out");
}

#[tokio::test]
async fn missing_signing_secret_fails_without_sending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let client = RpcClient::new(
        RpcClientConfig::default()
            .with_base_url(server.uri())
            .with_retry(fast_retry()),
    )
    .unwrap();

    let err = client.get("/x", CallOptions::new()).await.unwrap_err();

    assert!(matches!(err, RpcError::MissingSigningSecret));
}

#[tokio::test]
async fn unreachable_peer_is_a_network_error() {
    let client = RpcClient::new(
        RpcClientConfig::default()
            .with_base_url("http://127.0.0.1:1")
            .with_signing_secret(SECRET)
            .with_retry(fast_retry()),
    )
    .unwrap();

    let err = client.get("/x", CallOptions::new()).await.unwrap_err();

    assert!(matches!(err, RpcError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn dropped_connections_are_retried_as_network_errors() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    let client = RpcClient::new(
        RpcClientConfig::default()
            .with_base_url(format!("http://{addr}"))
            .with_signing_secret(SECRET)
            .with_retry(fast_retry()),
    )
    .unwrap();

    let err = client.get("/x", CallOptions::new()).await.unwrap_err();

    assert!(matches!(err, RpcError::Network(_)));
    assert_eq!(accepts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_success_body_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let value = client(&server).delete("/invoices/7", CallOptions::new()).await.unwrap();

    assert!(value.is_null());
}
