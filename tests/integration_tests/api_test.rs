//! HTTP API tests
//!
//! Sends requests straight into the axum router and checks the status code
//! each registry outcome maps to.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use concord::coordinator::{CoordinatorConfig, CoordinatorServer};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::fixtures::TestCoordinator;

fn test_app(t: &TestCoordinator) -> (CoordinatorServer, Router) {
    let config = CoordinatorConfig::builder()
        .persist(false)
        .enable_request_logging(false)
        .build()
        .unwrap();
    let server = CoordinatorServer::with_coordinator(config, t.coordinator.clone()).unwrap();
    let router = server.build_router();
    (server, router)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

// ============================================================================
// Services
// ============================================================================

#[tokio::test]
async fn test_service_lifecycle() {
    let t = TestCoordinator::new();
    let (_server, app) = test_app(&t);

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/services",
        Some(json!({"id": "svc1", "description": "billing"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "svc1");
    assert_eq!(body["data"]["description"], "billing");

    let (status, body) = send(&app, Method::POST, "/v1/services", Some(json!({"id": "svc1"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/services",
        Some(json!({"id": "bad id"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::POST, "/v1/services", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"].as_str().unwrap().len(), 15);

    let (status, _) = send(
        &app,
        Method::PUT,
        "/v1/services/svc1",
        Some(json!({"description": "payments", "version": "2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/v1/services/svc1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["description"], "payments");

    let (status, body) = send(&app, Method::GET, "/v1/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = send(&app, Method::DELETE, "/v1/services/svc1", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/v1/services/svc1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

// ============================================================================
// Providers and Routing
// ============================================================================

#[tokio::test]
async fn test_provider_and_query_flow() {
    let t = TestCoordinator::new();
    let (_server, app) = test_app(&t);

    let provider = json!({"host": "A", "port": 8001});

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/services/svc1/registry",
        Some(provider.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["port"], 8001);

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/services/svc1/registry",
        Some(provider.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/services/svc1/registry",
        Some(json!({"host": "A", "port": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/heartbeat",
        Some(json!({"service_id": "svc1", "host": "A", "port": 8001})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/heartbeat",
        Some(json!({"service_id": "svc1", "host": "A", "port": 9999})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, body) = send(&app, Method::POST, "/v1/services/svc1/subscription", None).await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, _) = send(&app, Method::GET, "/v1/query/svc1/wrong-token", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::GET, &format!("/v1/query/svc1/{token}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["endpoint"]["host"], "A");
    assert_eq!(body["data"]["endpoint"]["port"], 8001);

    // Past expiry the provider is no longer routable
    t.advance_secs(31);
    let (status, body) = send(&app, Method::GET, &format!("/v1/query/svc1/{token}"), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "unavailable");

    let (status, _) = send(&app, Method::DELETE, "/v1/services/svc1/registry/A/8001", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::DELETE, "/v1/services/svc1/registry/A/8001", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/v1/services/svc1/subscription/{token}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/v1/services/svc1/subscription/{token}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscribe_unknown_service() {
    let t = TestCoordinator::new();
    let (_server, app) = test_app(&t);

    let (status, _) = send(&app, Method::POST, "/v1/services/ghost/subscription", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Clusters
// ============================================================================

#[tokio::test]
async fn test_cluster_endpoints() {
    let t = TestCoordinator::new();
    let (_server, app) = test_app(&t);

    for (service, port) in [("s1", 8001), ("s2", 8002)] {
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/v1/services/{service}/registry"),
            Some(json!({"host": "A", "port": port})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/cluster/c1/services",
        Some(json!({"services": ["s1", "s2"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/cluster/c2/services",
        Some(json!({"services": ["s1"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Method::GET, "/v1/cluster/c1/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, Method::POST, "/v1/cluster/c1/heartbeat", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["endpoints"], 2);

    let (status, _) = send(&app, Method::POST, "/v1/cluster/nope/heartbeat", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::GET, "/v1/clusters", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

// ============================================================================
// Stats and Health
// ============================================================================

#[tokio::test]
async fn test_stats_endpoint() {
    let t = TestCoordinator::new();
    let (_server, app) = test_app(&t);

    t.coordinator
        .registry()
        .register("svc1", super::fixtures::provider(8001))
        .await
        .unwrap();

    let (status, body) = send(&app, Method::GET, "/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["registry"]["services"], 1);
    assert_eq!(body["data"]["registry"]["registrations"], 1);
    assert_eq!(body["data"]["coordinator"]["port"], 8080);
}

#[tokio::test]
async fn test_readiness_follows_startup() {
    let t = TestCoordinator::new();
    let (server, app) = test_app(&t);

    let (status, _) = send(&app, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    server.state().health.mark_ready();
    let (status, body) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_health_reports_dump_failures() {
    let t = TestCoordinator::new();
    let (server, app) = test_app(&t);
    server.state().health.mark_ready();

    t.backend.set_failing(true);
    assert!(t.coordinator.dump().await.is_err());

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    // Degraded still answers 200
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["persistence"]["consecutive_failures"], 1);
}
