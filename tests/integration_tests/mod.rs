//! Integration tests module
//!
//! End-to-end tests for the coordinator:
//! - Provider liveness, expiry sweep and query routing
//! - Snapshot dump/load and recovery from bad files
//! - HTTP status mapping through the axum router

pub mod api_test;
pub mod fixtures;
pub mod persistence_test;
pub mod registry_scenarios;
