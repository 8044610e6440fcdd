//! HTTP authority client behavior against a mock server.

use std::sync::Arc;

use warden_core::{AuthorityError, ReconcileRequest, UsageEntity, UsageWindow};
use warden_limiter::{HttpQuotaAuthority, QuotaAuthority, RateLimiter};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_request() -> ReconcileRequest {
    ReconcileRequest {
        entities: vec![UsageEntity {
            config_key: "login".to_string(),
            windows: vec![UsageWindow {
                key: "user-a".to_string(),
                timestamp: 1_000,
                usage: 2,
            }],
        }],
    }
}

#[tokio::test]
async fn reconcile_round_trips_json() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "entities": [{
            "config_key": "login",
            "window_secs": 60,
            "capacity": 5,
            "windows": [{ "key": "user-a", "timestamp": 960, "usage": 7 }]
        }]
    });
    Mock::given(method("POST"))
        .and(path("/v1/reconcile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let authority = HttpQuotaAuthority::new(server.uri());
    let response = authority.reconcile(sample_request()).await.expect("reconcile");

    assert_eq!(response.entities.len(), 1);
    let entity = &response.entities[0];
    assert_eq!(entity.config_key, "login");
    assert_eq!(entity.window_secs, 60);
    assert_eq!(entity.capacity, 5);
    assert_eq!(entity.windows[0].usage, 7);
}

#[tokio::test]
async fn server_error_surfaces_as_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/reconcile"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let authority = HttpQuotaAuthority::new(server.uri());
    let error = authority.reconcile(sample_request()).await.unwrap_err();
    assert!(matches!(error, AuthorityError::Status { status: 503 }));
}

#[tokio::test]
async fn malformed_body_surfaces_as_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/reconcile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let authority = HttpQuotaAuthority::new(server.uri());
    let error = authority.reconcile(sample_request()).await.unwrap_err();
    assert!(matches!(error, AuthorityError::Decode(_)));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    // Port 1 on localhost refuses connections.
    let authority = HttpQuotaAuthority::new("http://127.0.0.1:1");
    let error = authority.reconcile(sample_request()).await.unwrap_err();
    assert!(matches!(error, AuthorityError::Transport(_)));
}

#[tokio::test]
async fn limiter_learns_policies_over_http() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "entities": [{
            "config_key": "login",
            "window_secs": 60,
            "capacity": 1,
            "windows": []
        }]
    });
    Mock::given(method("POST"))
        .and(path("/v1/reconcile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let authority = Arc::new(HttpQuotaAuthority::new(server.uri()));
    let limiter = RateLimiter::builder(authority).build();

    // Orphaned until the first cycle pushes the policy down.
    limiter.limit_rate("login", "user-a").expect("fail-open");
    limiter.reconcile().await.expect("reconcile over http");

    limiter.limit_rate("login", "user-a").expect("within capacity");
    limiter.limit_rate("login", "user-a").expect("boundary admit");
    assert!(limiter.limit_rate("login", "user-a").is_err());
}
