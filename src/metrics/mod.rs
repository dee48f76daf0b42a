//! Prometheus metrics for the concord coordinator
//!
//! Registry traffic (registrations, heartbeats, routed queries, API calls)
//! and maintenance work (evictions, snapshot dumps, tick duration), all
//! under the `concord_` prefix.
//!
//! Nothing is recorded until `init_metrics()` has run; before that, and
//! after a failed registration, every recorder silently does nothing.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for registry metrics
struct RegistryMetrics {
    registered_services: Gauge,
    registrations: Counter,
    heartbeats: Counter,
    heartbeat_errors: Counter,
    routes: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Container for maintenance metrics
struct MaintenanceMetrics {
    evictions: Counter,
    dumps: CounterVec,
    tick_duration: Histogram,
}

/// Global storage for registry metrics
static REGISTRY_METRICS: OnceLock<RegistryMetrics> = OnceLock::new();

/// Global storage for maintenance metrics
static MAINTENANCE_METRICS: OnceLock<MaintenanceMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register every metric with the default Prometheus registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let registry = RegistryMetrics {
        registered_services: register_gauge!(
            "concord_registered_services",
            "Number of services known to the registry"
        )?,
        registrations: register_counter!(
            "concord_registrations_total",
            "Total number of provider registrations accepted"
        )?,
        heartbeats: register_counter!(
            "concord_heartbeats_total",
            "Total number of provider heartbeats accepted"
        )?,
        heartbeat_errors: register_counter!(
            "concord_heartbeat_errors_total",
            "Total number of heartbeats rejected"
        )?,
        routes: register_counter_vec!(
            "concord_routes_total",
            "Total query routing decisions by outcome",
            &["outcome"]
        )?,
        api_requests: register_counter_vec!(
            "concord_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "concord_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let maintenance = MaintenanceMetrics {
        evictions: register_counter!(
            "concord_evictions_total",
            "Total providers evicted for missing heartbeats"
        )?,
        dumps: register_counter_vec!(
            "concord_snapshot_dumps_total",
            "Total snapshot dumps by result",
            &["result"]
        )?,
        tick_duration: register_histogram!(
            "concord_maintenance_tick_duration_seconds",
            "Time spent on one sweep + dump round in seconds",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        )?,
    };

    // Store metrics - these should always succeed since we just created them
    REGISTRY_METRICS
        .set(registry)
        .map_err(|_| "Registry metrics already initialized")?;
    MAINTENANCE_METRICS
        .set(maintenance)
        .map_err(|_| "Maintenance metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    REGISTRY_METRICS.get().is_some() && MAINTENANCE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update the service count
pub fn set_registered_services(count: usize) {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.registered_services.set(count as f64);
    }
}

/// Record an accepted registration
pub fn record_registration() {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.registrations.inc();
    }
}

/// Record a heartbeat
pub fn record_heartbeat(accepted: bool) {
    let Some(m) = REGISTRY_METRICS.get() else {
        return;
    };

    if accepted {
        m.heartbeats.inc();
    } else {
        m.heartbeat_errors.inc();
    }
}

/// Record a routing decision (`routed` or an error kind)
pub fn record_route(outcome: &str) {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.routes.with_label_values(&[outcome]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = REGISTRY_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record providers evicted by a sweep
pub fn record_evictions(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = MAINTENANCE_METRICS.get() {
        m.evictions.inc_by(count as f64);
    }
}

/// Record a snapshot dump outcome
pub fn record_dump(success: bool) {
    if let Some(m) = MAINTENANCE_METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.dumps.with_label_values(&[result]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a maintenance tick timer (returns a timer handle)
pub fn start_tick_timer() -> MetricsTimer {
    match MAINTENANCE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.tick_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
