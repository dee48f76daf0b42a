//! Service coordinator
//!
//! Tracks which providers serve each service, keeps them alive through
//! heartbeats, evicts the ones that go silent, and routes subscriber queries
//! to a live provider. State survives restarts through periodic snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              Coordinator                 │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │        Service Registry            │  │
//! │  │  - Services (per-service lock)     │  │
//! │  │  - Registrations + heartbeats      │  │
//! │  │  - Subscriptions / routing         │  │
//! │  │  - Cluster index                   │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │        Maintenance loop            │  │
//! │  │  - Expiry sweep                    │  │
//! │  │  - Snapshot dump                   │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │        REST API                    │  │
//! │  │  /v1/services, /v1/heartbeat       │  │
//! │  │  /v1/query/{id}/{token}            │  │
//! │  │  /v1/cluster/{id}/...              │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use concord::coordinator::{CoordinatorConfig, CoordinatorServer};
//!
//! let config = CoordinatorConfig::default();
//! let server = CoordinatorServer::new(config).await?;
//! server.start().await?;
//! ```

pub mod api;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod health;
pub mod registry;
pub mod router;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod state;
pub mod sweeper;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{ClusterIndex, ClusterInfo};
pub use config::CoordinatorConfig;
pub use registry::{RegistryError, RegistryOptions, RegistryStats, ServiceRegistry};
pub use router::{Route, RoutingPolicy};
pub use server::CoordinatorServer;
pub use service::{Endpoint, Registration, ServiceSpec, ServiceView};
pub use snapshot::{
    FileBackend, MemoryBackend, PersistenceStatus, Snapshot, SnapshotBackend, SnapshotError,
    SnapshotStore,
};
pub use state::Coordinator;
pub use sweeper::{spawn_maintenance, MaintenanceHandle, SweepReport};
