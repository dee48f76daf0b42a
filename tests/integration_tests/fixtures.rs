//! Shared fixtures for integration tests

use std::sync::Arc;
use std::time::Duration;

use concord::coordinator::{
    Coordinator, Endpoint, ManualClock, MemoryBackend, RegistryOptions, SnapshotStore,
};

/// Clock start used by every fixture
pub const START: i64 = 1_000;

/// Expiry used by every fixture
pub const EXPIRY: Duration = Duration::from_secs(30);

/// Coordinator driven by a manual clock and an in-memory snapshot
pub struct TestCoordinator {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<MemoryBackend>,
    pub coordinator: Arc<Coordinator>,
}

impl TestCoordinator {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions {
            expiry_interval: EXPIRY,
            subscription_idle_timeout: None,
        })
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = Coordinator::new(
            clock.clone(),
            options,
            SnapshotStore::new(backend.clone()),
            8080,
        );

        Self {
            clock,
            backend,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

/// Provider endpoint on host `A`
pub fn provider(port: u16) -> Endpoint {
    Endpoint::new("A", port)
}
