//! HTTP server around a [`Coordinator`]
//!
//! Binds the listener, runs the maintenance loop for as long as the server
//! is up, and writes a last snapshot when it shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};

use super::api::create_router;
use super::clock::{Clock, SystemClock};
use super::config::CoordinatorConfig;
use super::health::{create_health_router, HealthChecker};
use super::state::Coordinator;
use super::sweeper::spawn_maintenance;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Registry and persistence
    pub coordinator: Arc<Coordinator>,

    /// Readiness flag
    pub health: HealthChecker,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: CoordinatorConfig,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Coordinator plus its HTTP front end
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
}

impl CoordinatorServer {
    /// Create a server, restoring state from the configured snapshot
    pub async fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let coordinator = Arc::new(Coordinator::bootstrap(&config, clock).await);

        Self::with_coordinator(config, coordinator)
    }

    /// Create a server around an existing coordinator
    pub fn with_coordinator(
        config: CoordinatorConfig,
        coordinator: Arc<Coordinator>,
    ) -> Result<Self> {
        config.validate()?;

        let state = AppState {
            coordinator,
            health: HealthChecker::new(),
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router =
            create_router(self.state.clone()).merge(create_health_router(self.state.clone()));

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server
    pub async fn start(&self) -> Result<()> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start with graceful shutdown.
    ///
    /// The maintenance loop runs for the lifetime of the server and is
    /// stopped after the HTTP listener drains.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!(%addr, "Coordinator listening");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::with_source(format!("Failed to bind {addr}"), e))?;

        let maintenance = spawn_maintenance(
            self.state.coordinator.clone(),
            self.config.sweep_interval(),
        );
        self.state.health.mark_ready();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await;

        self.state.health.mark_not_ready();
        if let Some(Err(e)) = maintenance.stop(self.config.final_dump_on_shutdown).await {
            tracing::error!("Final snapshot failed: {}", e);
        }

        served?;
        tracing::info!("Coordinator server shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            expiry_interval_secs: self.config.expiry_interval_secs,
            sweep_interval_secs: self.config.sweep_interval_secs,
            snapshot: if self.config.persist {
                self.config.snapshot_path.display().to_string()
            } else {
                "memory".to_string()
            },
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub expiry_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub snapshot: String,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Expiry Interval: {}s\n\
             Sweep Interval: {}s\n\
             Snapshot: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.expiry_interval_secs,
            self.sweep_interval_secs,
            self.snapshot,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
