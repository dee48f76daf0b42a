//! REST API handlers for the Coordinator server
//!
//! Thin mapping from HTTP routes onto [`ServiceRegistry`] operations. Every
//! registry error carries an [`ErrorKind`], which picks the status code.
//!
//! [`ServiceRegistry`]: super::registry::ServiceRegistry

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConcordErrorTrait, ErrorKind};
use crate::metrics;

use super::registry::{RegistryError, RegistryStats};
use super::server::AppState;
use super::service::{Endpoint, ServiceSpec};
use super::state::CoordinatorInfo;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Error response carrying the error kind
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: ErrorKind,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind,
            error: message.into(),
        }
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::PersistenceFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &impl ConcordErrorTrait) -> Response {
    let kind = err.kind();
    (status_for(kind), Json(ErrorResponse::new(kind, err.to_string()))).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, RegistryError>) -> Response {
    match result {
        Ok(data) => (status, Json(ApiResponse::success(data))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Create service request
#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub spec: ServiceSpec,
}

/// Provider heartbeat request
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub service_id: String,
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

/// Cluster membership request
#[derive(Debug, Deserialize)]
pub struct AddToClusterRequest {
    pub services: Vec<String>,
}

/// Subscribe response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub service_id: String,
    pub token: String,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub coordinator: CoordinatorInfo,
    pub uptime_secs: u64,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Service endpoints
        .route("/v1/services", get(list_services).post(create_service))
        .route(
            "/v1/services/{id}",
            get(get_service).put(replace_service).delete(delete_service),
        )
        // Provider endpoints
        .route("/v1/services/{id}/registry", post(register))
        .route("/v1/services/{id}/registry/{host}/{port}", delete(deregister))
        .route("/v1/heartbeat", post(heartbeat))
        // Subscriber endpoints
        .route("/v1/services/{id}/subscription", post(subscribe))
        .route("/v1/services/{id}/subscription/{token}", delete(unsubscribe))
        .route("/v1/query/{id}/{token}", get(query))
        // Cluster endpoints
        .route("/v1/clusters", get(list_clusters))
        .route(
            "/v1/cluster/{id}/services",
            get(cluster_services).post(add_to_cluster),
        )
        .route("/v1/cluster/{id}/heartbeat", post(cluster_heartbeat))
        // Stats endpoints
        .route("/v1/stats", get(get_stats))
        .route("/metrics", get(prometheus_metrics))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Record count and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Service Handlers
// ============================================================================

async fn list_services(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.coordinator.registry().list_services().await,
    ))
}

async fn create_service(
    State(state): State<AppState>,
    Json(request): Json<CreateServiceRequest>,
) -> Response {
    let result = state
        .coordinator
        .registry()
        .create_service(request.id, request.spec)
        .await;
    respond(StatusCode::CREATED, result)
}

async fn get_service(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(
        StatusCode::OK,
        state.coordinator.registry().get_service(&id).await,
    )
}

async fn replace_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(spec): Json<ServiceSpec>,
) -> Response {
    respond(
        StatusCode::OK,
        state.coordinator.registry().replace_service(&id, spec).await,
    )
}

async fn delete_service(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(
        StatusCode::OK,
        state.coordinator.registry().delete_service(&id).await,
    )
}

// ============================================================================
// Provider Handlers
// ============================================================================

/// Register a provider
async fn register(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(endpoint): Json<Endpoint>,
) -> Response {
    respond(
        StatusCode::CREATED,
        state.coordinator.registry().register(&id, endpoint).await,
    )
}

async fn deregister(
    State(state): State<AppState>,
    Path((id, host, port)): Path<(String, String, u16)>,
) -> Response {
    let endpoint = Endpoint::new(host, port);
    respond(
        StatusCode::OK,
        state.coordinator.registry().deregister(&id, &endpoint).await,
    )
}

/// Process heartbeat from a provider
async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Response {
    let result = state
        .coordinator
        .registry()
        .heartbeat(&request.service_id, &request.endpoint)
        .await
        .map(|()| format!("Heartbeat recorded for {}", request.endpoint));
    respond(StatusCode::OK, result)
}

// ============================================================================
// Subscriber Handlers
// ============================================================================

async fn subscribe(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state
        .coordinator
        .registry()
        .subscribe(&id)
        .await
        .map(|token| SubscriptionResponse {
            service_id: id.clone(),
            token,
        });
    respond(StatusCode::CREATED, result)
}

async fn unsubscribe(
    State(state): State<AppState>,
    Path((id, token)): Path<(String, String)>,
) -> Response {
    let result = state
        .coordinator
        .registry()
        .unsubscribe(&id, &token)
        .await
        .map(|()| format!("Unsubscribed from {}", id));
    respond(StatusCode::OK, result)
}

/// Resolve a subscriber's query to one live provider
async fn query(
    State(state): State<AppState>,
    Path((id, token)): Path<(String, String)>,
) -> Response {
    respond(
        StatusCode::OK,
        state.coordinator.registry().route(&id, &token).await,
    )
}

// ============================================================================
// Cluster Handlers
// ============================================================================

async fn list_clusters(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.coordinator.registry().list_clusters().await,
    ))
}

async fn cluster_services(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(
        StatusCode::OK,
        state.coordinator.registry().cluster_services(&id).await,
    )
}

async fn add_to_cluster(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddToClusterRequest>,
) -> Response {
    respond(
        StatusCode::OK,
        state
            .coordinator
            .registry()
            .add_to_cluster(&id, &request.services)
            .await,
    )
}

async fn cluster_heartbeat(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(
        StatusCode::OK,
        state.coordinator.registry().cluster_heartbeat(&id).await,
    )
}

// ============================================================================
// Stats Handlers
// ============================================================================

/// Get coordinator stats
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(StatsResponse {
        registry: state.coordinator.registry().stats().await,
        coordinator: state.coordinator.info(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// Prometheus text exposition
async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
