//! Snapshot persistence tests
//!
//! Covers dump/load through a real file, recovery from unreadable files and
//! the coordinator staying usable while dumps fail.

use std::sync::Arc;

use concord::coordinator::{
    Coordinator, CoordinatorConfig, ManualClock, RegistryOptions, SnapshotStore,
};
use tempfile::TempDir;

use super::fixtures::{provider, TestCoordinator, EXPIRY, START};

fn options() -> RegistryOptions {
    RegistryOptions {
        expiry_interval: EXPIRY,
        subscription_idle_timeout: None,
    }
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("coordinator.json");
    let clock = Arc::new(ManualClock::new(START));

    let first = Coordinator::load(SnapshotStore::file(&path), clock.clone(), options(), 8080).await;
    let registry = first.registry();
    registry.register("svc1", provider(8001)).await.unwrap();
    registry.register("svc2", provider(8002)).await.unwrap();
    registry
        .add_to_cluster("c1", &["svc1".to_string(), "svc2".to_string()])
        .await
        .unwrap();
    let token = registry.subscribe("svc1").await.unwrap();
    first.dump().await.unwrap();

    let second = Coordinator::load(SnapshotStore::file(&path), clock.clone(), options(), 8080).await;
    assert_eq!(second.to_snapshot().await, first.to_snapshot().await);

    // Old tokens keep working after the restart
    let route = second.registry().route("svc1", &token).await.unwrap();
    assert_eq!(route.address(), "A:8001");
    assert_eq!(second.registry().cluster_of("svc2").await.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_restored_heartbeats_still_expire() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("coordinator.json");
    let clock = Arc::new(ManualClock::new(START));

    let first = Coordinator::load(SnapshotStore::file(&path), clock.clone(), options(), 8080).await;
    first.registry().register("svc1", provider(8001)).await.unwrap();
    first.dump().await.unwrap();

    // Coordinator was down longer than the expiry interval
    clock.advance(EXPIRY * 2);
    let second = Coordinator::load(SnapshotStore::file(&path), clock.clone(), options(), 8080).await;
    let report = second.sweep().await;

    assert_eq!(report.evicted.len(), 1);
    assert_eq!(second.registry().stats().await.registrations, 0);
}

#[tokio::test]
async fn test_unsupported_schema_is_moved_aside() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("coordinator.json");
    std::fs::write(&path, br#"{"schema_version": 99, "services": {}}"#).unwrap();

    let clock = Arc::new(ManualClock::new(START));
    let coordinator = Coordinator::load(SnapshotStore::file(&path), clock, options(), 8080).await;

    assert_eq!(coordinator.registry().stats().await.services, 0);
    assert!(!path.exists());
    assert!(temp_dir
        .path()
        .join(format!("coordinator.json.corrupt-{START}"))
        .exists());

    // The next dump starts a fresh file
    coordinator.dump().await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn test_dump_failure_keeps_serving() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("svc1", provider(8001)).await.unwrap();
    t.backend.set_failing(true);

    t.coordinator.tick().await;
    assert!(t.coordinator.dump().await.is_err());

    // Mutations keep working while the snapshot cannot be written
    registry.register("svc1", provider(8002)).await.unwrap();
    let token = registry.subscribe("svc1").await.unwrap();
    assert!(registry.route("svc1", &token).await.is_ok());

    let status = t.coordinator.persistence_status().await;
    assert_eq!(status.consecutive_failures, 2);
    assert!(status.last_error.is_some());
    assert!(t.backend.contents().await.is_none());

    t.backend.set_failing(false);
    t.coordinator.dump().await.unwrap();

    let status = t.coordinator.persistence_status().await;
    assert!(status.is_healthy());
    assert_eq!(status.dumps, 3);
    assert!(t.backend.contents().await.is_some());
}

#[tokio::test]
async fn test_bootstrap_without_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("never.json");
    let config = CoordinatorConfig::builder()
        .snapshot_path(&path)
        .persist(false)
        .build()
        .unwrap();

    let coordinator = Coordinator::bootstrap(&config, Arc::new(ManualClock::new(START))).await;
    coordinator.registry().register("svc1", provider(8001)).await.unwrap();
    coordinator.dump().await.unwrap();

    assert_eq!(coordinator.persistence_status().await.location, "memory");
    assert!(!path.exists());
}
