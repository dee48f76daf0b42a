//! Liveness and readiness probes
//!
//! - `/health/live` answers as long as the process is up.
//! - `/health/ready` is `unhealthy` (503) until the server has started its
//!   maintenance loop, and `degraded` (still 200) while snapshot dumps are
//!   failing: the registry keeps serving from memory, but its state would
//!   not survive a restart.
//! - `/health` adds version, uptime and the full persistence status.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::snapshot::PersistenceStatus;
use super::server::AppState;

// ============================================================================
// Types
// ============================================================================

/// Probe outcome, worst component wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            // Still serving from memory
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// One named check inside a probe response
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: Vec<ComponentHealth>,
}

/// `/health` body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub persistence: PersistenceStatus,
    pub checks: Vec<ComponentHealth>,
}

// ============================================================================
// Readiness flag
// ============================================================================

/// Readiness flag shared between the server and the probes
#[derive(Clone)]
pub struct HealthChecker {
    ready: Arc<AtomicBool>,
    started: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    /// Starts out not ready
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!("Coordinator ready");
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
        tracing::info!("Coordinator no longer ready");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Probe routes
pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/health", get(health_check))
        .with_state(state)
}

// ============================================================================
// Checks
// ============================================================================

fn persistence_check(status: &PersistenceStatus) -> ComponentHealth {
    let (health, message) = if status.is_healthy() {
        let message = match status.last_success_at {
            Some(at) => format!("last dump at {at} to {}", status.location),
            None => format!("no dump yet to {}", status.location),
        };
        (HealthStatus::Healthy, message)
    } else {
        (
            HealthStatus::Degraded,
            format!(
                "{} consecutive dump failure(s): {}",
                status.consecutive_failures,
                status.last_error.as_deref().unwrap_or("unknown error")
            ),
        )
    };

    ComponentHealth {
        name: "persistence".to_string(),
        status: health,
        message: Some(message),
        latency_ms: None,
    }
}

/// Worst status wins
fn overall(checks: &[ComponentHealth]) -> HealthStatus {
    if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

async fn collect_checks(state: &AppState) -> (Vec<ComponentHealth>, PersistenceStatus) {
    let mut checks = Vec::new();

    checks.push(ComponentHealth {
        name: "startup".to_string(),
        status: if state.health.is_ready() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        message: None,
        latency_ms: None,
    });

    // Registry responsiveness
    let registry_start = Instant::now();
    let stats = state.coordinator.registry().stats().await;
    let registry_latency = registry_start.elapsed().as_millis() as u64;

    checks.push(ComponentHealth {
        name: "registry".to_string(),
        status: HealthStatus::Healthy,
        message: Some(format!(
            "{} services, {} providers, {} subscriptions",
            stats.services, stats.registrations, stats.subscriptions
        )),
        latency_ms: Some(registry_latency),
    });

    let persistence = state.coordinator.persistence_status().await;
    checks.push(persistence_check(&persistence));

    (checks, persistence)
}

// ============================================================================
// Handlers
// ============================================================================

async fn liveness_probe() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: HealthStatus::Healthy,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn readiness_probe(State(state): State<AppState>) -> impl IntoResponse {
    let (checks, _) = collect_checks(&state).await;
    let status = overall(&checks);

    let response = ReadinessResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
    };

    (status.status_code(), Json(response))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (checks, persistence) = collect_checks(&state).await;
    let status = overall(&checks);

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        persistence,
        checks,
    };

    (status.status_code(), Json(response))
}

// ============================================================================
// Tests
// ============================================================================
