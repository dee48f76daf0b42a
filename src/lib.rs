//! concord - service registry and query-routing coordinator
//!
//! Providers register endpoints for a service and keep them alive with
//! heartbeats; subscribers obtain a token and have their queries routed to a
//! live provider. A background sweep evicts providers that stop
//! heartbeating, and the whole registry is snapshotted so it survives a
//! restart.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`coordinator`] - Registry, routing, sweep, snapshots and the HTTP adapter
//! - [`config`] - Configuration loading (environment, TOML)
//! - [`commands`] - CLI command implementations
//! - [`error`] - Unified error type and error kinds
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use concord::coordinator::{
//!     Coordinator, Endpoint, RegistryOptions, SnapshotStore, SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = Coordinator::new(
//!         Arc::new(SystemClock),
//!         RegistryOptions::default(),
//!         SnapshotStore::memory(),
//!         8080,
//!     );
//!
//!     let registry = coordinator.registry();
//!     registry.register("svc1", Endpoint::new("10.0.0.5", 8001)).await?;
//!     let token = registry.subscribe("svc1").await?;
//!     let route = registry.route("svc1", &token).await?;
//!     println!("query goes to {}", route.address());
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{
        Coordinator, CoordinatorConfig, CoordinatorServer, Endpoint, Route, ServiceRegistry,
        ServiceSpec,
    };
    pub use crate::error::{ConcordErrorTrait, Error, ErrorKind, Result};
}
