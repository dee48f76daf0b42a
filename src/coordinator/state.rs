//! Coordinator root state
//!
//! Owns the registry and the snapshot store, and knows how to turn one into
//! the other: building a [`Snapshot`] from the live registry, and rebuilding
//! the registry from a loaded snapshot at startup.

use std::sync::Arc;

use serde::Serialize;

use crate::metrics;

use super::clock::Clock;
use super::config::CoordinatorConfig;
use super::registry::{RegistryOptions, ServiceRegistry};
use super::snapshot::{PersistenceStatus, Snapshot, SnapshotError, SnapshotStore, SCHEMA_VERSION};
use super::sweeper::{self, SweepReport};

/// Version recorded in every snapshot
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-level facts about the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorInfo {
    pub created: i64,
    pub modified: i64,
    pub port: u16,
    pub version: String,
}

/// Registry plus its persistence
pub struct Coordinator {
    created: i64,
    port: u16,
    registry: ServiceRegistry,
    store: SnapshotStore,
}

impl Coordinator {
    /// Fresh coordinator with an empty registry
    pub fn new(
        clock: Arc<dyn Clock>,
        options: RegistryOptions,
        store: SnapshotStore,
        port: u16,
    ) -> Self {
        let registry = ServiceRegistry::new(clock, options);
        Self {
            created: registry.now(),
            port,
            registry,
            store,
        }
    }

    /// Rebuild a coordinator from a loaded snapshot.
    ///
    /// Entries that violate registry invariants are dropped with a warning.
    pub async fn restore(
        snapshot: Snapshot,
        clock: Arc<dyn Clock>,
        options: RegistryOptions,
        store: SnapshotStore,
        port: u16,
    ) -> Self {
        let services = snapshot
            .services
            .into_iter()
            .map(|(key, mut service)| {
                if service.id != key {
                    tracing::warn!(
                        key = %key,
                        service_id = %service.id,
                        "Snapshot entry id does not match its key; using the key"
                    );
                    service.id = key;
                }
                service
            })
            .collect::<Vec<_>>();

        let restored = services.len();
        let registry =
            ServiceRegistry::from_parts(clock, options, services, snapshot.clusters, snapshot.modified);
        let report = registry.repair().await;

        tracing::info!(
            services = restored,
            written_by = %snapshot.version,
            repaired = report.orphaned_heartbeats.len() + report.orphaned_memberships.len(),
            "Coordinator state restored"
        );

        Self {
            created: snapshot.created,
            port,
            registry,
            store,
        }
    }

    /// Load the last snapshot from `store`, or start empty.
    ///
    /// An unreadable snapshot is moved aside and the coordinator starts
    /// empty; this never fails.
    pub async fn load(
        store: SnapshotStore,
        clock: Arc<dyn Clock>,
        options: RegistryOptions,
        port: u16,
    ) -> Self {
        let loaded = store.load().await;
        match loaded {
            Ok(Some(snapshot)) => Self::restore(snapshot, clock, options, store, port).await,
            Ok(None) => {
                tracing::info!(location = %store.location(), "No snapshot found, starting empty");
                Self::new(clock, options, store, port)
            }
            Err(e) => {
                tracing::error!(location = %store.location(), error = %e, "Failed to load snapshot");
                let suffix = clock.now_millis().to_string();
                match store.quarantine(&suffix).await {
                    Ok(Some(moved)) => {
                        tracing::warn!(moved_to = %moved, "Unreadable snapshot moved aside")
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to move unreadable snapshot"),
                }
                Self::new(clock, options, store, port)
            }
        }
    }

    /// Build the coordinator described by `config`
    pub async fn bootstrap(config: &CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        let store = if config.persist {
            SnapshotStore::file(&config.snapshot_path)
        } else {
            SnapshotStore::memory()
        };

        Self::load(store, clock, config.registry_options(), config.bind_address.port()).await
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn info(&self) -> CoordinatorInfo {
        CoordinatorInfo {
            created: self.created,
            modified: self.registry.modified_at(),
            port: self.port,
            version: VERSION.to_string(),
        }
    }

    /// Image of the current state
    pub async fn to_snapshot(&self) -> Snapshot {
        let (services, clusters) = self.registry.export().await;

        Snapshot {
            schema_version: SCHEMA_VERSION,
            created: self.created,
            modified: self.registry.modified_at(),
            port: self.port,
            version: VERSION.to_string(),
            services: services.into_iter().map(|s| (s.id.clone(), s)).collect(),
            clusters,
        }
    }

    /// Write a snapshot. A failure is logged and returned, never fatal.
    pub async fn dump(&self) -> Result<(), SnapshotError> {
        let snapshot = self.to_snapshot().await;
        let result = self.store.dump(&snapshot, self.registry.now()).await;

        match &result {
            Ok(()) => tracing::debug!(
                location = %self.store.location(),
                services = snapshot.services.len(),
                "Snapshot dumped"
            ),
            Err(e) => tracing::warn!(
                location = %self.store.location(),
                error = %e,
                "Snapshot dump failed; state remains in memory"
            ),
        }

        result
    }

    pub async fn sweep(&self) -> SweepReport {
        sweeper::sweep(&self.registry).await
    }

    /// One maintenance round: sweep, then dump
    pub async fn tick(&self) -> SweepReport {
        let _timer = metrics::start_tick_timer();
        let report = self.sweep().await;
        // Failure already logged; the next tick retries.
        let _ = self.dump().await;
        report
    }

    pub async fn persistence_status(&self) -> PersistenceStatus {
        self.store.status().await
    }
}
