//! Endpoint failure handling through a running gateway

mod common;

use std::time::Duration;

use common::{TestEnv, dead_endpoint};
use serde_json::{Value, json};
use tenantgate_gateway::FailMode;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_connect_failure_retries_next_endpoint() {
    let dead = dead_endpoint().await;
    let env = TestEnv::start_with(true, |config| {
        let read = &mut config.backend_clusters[0];
        read.endpoints.insert(0, dead.clone());
        read.unhealthy_threshold = 3;
    })
    .await;
    let token = env.token("u1", json!({"org_id": "1234567"}));

    for _ in 0..6 {
        let response = env.get("/api/cost-management/v1/status", &token).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "read");
    }

    // Rotation hits the dead endpoint first on every other request.
    assert_eq!(env.read.received_requests().await.unwrap().len(), 6);
    let cluster = env.gateway.clusters().get("cost-read").unwrap();
    assert_eq!(cluster.healthy_count(), 1);
    assert_eq!(env.gateway.metrics_snapshot().upstream_retries, 3);
}

#[tokio::test]
async fn test_all_endpoints_down_fails_closed() {
    let dead = dead_endpoint().await;
    let env = TestEnv::start_with(true, |config| {
        let read = &mut config.backend_clusters[0];
        read.endpoints = vec![dead.clone()];
        read.unhealthy_threshold = 1;
    })
    .await;
    let token = env.token("u1", json!({"org_id": "1234567"}));

    let response = env.get("/api/cost-management/v1/status", &token).await;
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Bad gateway"}));

    let response = env.get("/api/cost-management/v1/status", &token).await;
    assert_eq!(response.status(), 503);

    let response = env.client.get(env.url("/ready")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_fail_open_still_attempts_ejected_endpoint() {
    let dead = dead_endpoint().await;
    let env = TestEnv::start_with(true, |config| {
        config.fail_mode = FailMode::Open;
        let read = &mut config.backend_clusters[0];
        read.endpoints = vec![dead.clone()];
        read.unhealthy_threshold = 1;
    })
    .await;
    let token = env.token("u1", json!({"org_id": "1234567"}));

    assert_eq!(
        env.get("/api/cost-management/v1/status", &token).await.status(),
        502
    );
    // Ejected, but fail-open forwards anyway and the connect fails again.
    assert_eq!(
        env.get("/api/cost-management/v1/status", &token).await.status(),
        502
    );
}

#[tokio::test]
async fn test_fail_open_never_skips_identity_check() {
    let env = TestEnv::start_with(false, |config| config.fail_mode = FailMode::Open).await;
    let token = env.token("u1", json!({"org_id": "1234567"}));

    let response = env.get("/api/cost-management/v1/status", &token).await;
    assert_eq!(response.status(), 503);
    assert!(env.read.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_status_ejects_endpoint() {
    let failing = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&failing)
        .await;

    let failing_uri = failing.uri();
    let env = TestEnv::start_with(true, |config| {
        let read = &mut config.backend_clusters[0];
        read.endpoints.insert(0, failing_uri.clone());
        read.unhealthy_threshold = 2;
    })
    .await;
    let token = env.token("u1", json!({"org_id": "1234567"}));

    let mut statuses = Vec::new();
    for _ in 0..6 {
        statuses.push(
            env.get("/api/cost-management/v1/status", &token)
                .await
                .status()
                .as_u16(),
        );
    }
    // Upstream 503s are relayed, not retried; the endpoint leaves rotation after two.
    assert_eq!(statuses, vec![503, 200, 503, 200, 200, 200]);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let slow = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&slow)
        .await;

    let slow_uri = slow.uri();
    let env = TestEnv::start_with(true, |config| {
        config.request_timeout_seconds = 1;
        config.backend_clusters[0].endpoints = vec![slow_uri.clone()];
    })
    .await;
    let token = env.token("u1", json!({"org_id": "1234567"}));

    let response = env.get("/api/cost-management/v1/status", &token).await;
    assert_eq!(response.status(), 504);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Gateway timeout"}));
}
