//! Expiry sweep and the maintenance loop
//!
//! A sweep evicts every provider whose last heartbeat is older than the
//! expiry interval, drops idle subscriptions when a timeout is configured and
//! cleans up orphaned heartbeat and cluster entries. Evictions go through the
//! same per-service deregister path clients use.
//!
//! The maintenance loop runs one sweep followed by one snapshot dump on
//! every tick until it is stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::metrics;

use super::clock::duration_millis;
use super::config::MAX_INTERVAL_SECS;
use super::registry::{RepairReport, ServiceRegistry};
use super::snapshot::SnapshotError;
use super::state::Coordinator;

// ============================================================================
// Sweep
// ============================================================================

/// What one sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `(service, endpoint)` providers evicted for missing heartbeats
    pub evicted: Vec<(String, String)>,

    /// Subscriptions dropped for being idle
    pub idle_subscriptions: usize,

    pub repaired: RepairReport,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.idle_subscriptions == 0 && self.repaired.is_clean()
    }
}

/// Run one expiry pass over the whole registry
pub async fn sweep(registry: &ServiceRegistry) -> SweepReport {
    let now = registry.now();
    let options = registry.options();

    let mut report = SweepReport {
        repaired: registry.repair().await,
        ..SweepReport::default()
    };

    registry
        .for_each_service(|service| {
            for registration in service.evict_expired(now, options.expiry_interval) {
                let endpoint = registration.full_endpoint();
                tracing::info!(
                    service_id = %service.id,
                    endpoint = %endpoint,
                    "Evicted provider with stale heartbeat"
                );
                report.evicted.push((service.id.clone(), endpoint));
            }

            if let Some(idle) = options.subscription_idle_timeout {
                let dropped = service.evict_idle_subscriptions(now, idle);
                if dropped > 0 {
                    tracing::info!(service_id = %service.id, dropped, "Dropped idle subscriptions");
                }
                report.idle_subscriptions += dropped;
            }
        })
        .await;

    if !report.evicted.is_empty() || report.idle_subscriptions > 0 {
        registry.touch();
    }
    metrics::record_evictions(report.evicted.len());

    report
}

// ============================================================================
// Maintenance loop
// ============================================================================

/// Handle to the running maintenance loop
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    coordinator: Arc<Coordinator>,
}

/// Start the recurring sweep + dump loop.
///
/// The first tick fires one `period` after the call. The period is clamped
/// to between one millisecond and [`MAX_INTERVAL_SECS`].
pub fn spawn_maintenance(coordinator: Arc<Coordinator>, period: Duration) -> MaintenanceHandle {
    let period = period.clamp(Duration::from_millis(1), Duration::from_secs(MAX_INTERVAL_SECS));
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let worker = coordinator.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    worker.tick().await;
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Maintenance loop shutting down");
                    break;
                }
            }
        }
    });

    tracing::info!(period_ms = duration_millis(period), "Maintenance loop started");

    MaintenanceHandle {
        task,
        shutdown,
        coordinator,
    }
}

impl MaintenanceHandle {
    /// Stop the loop, waiting for an in-flight tick to finish.
    ///
    /// With `final_dump` one last snapshot is written after the loop exits
    /// and its outcome returned.
    pub async fn stop(self, final_dump: bool) -> Option<Result<(), SnapshotError>> {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Maintenance task ended abnormally: {}", e);
        }

        if final_dump {
            Some(self.coordinator.dump().await)
        } else {
            None
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
