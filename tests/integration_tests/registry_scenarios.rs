//! Registry scenario tests
//!
//! Drives the registry through the coordinator with a manual clock:
//! 1. Expiry sweep and routing around stale providers
//! 2. Cluster heartbeats
//! 3. Races between deregister and the sweep
//! 4. The background maintenance loop

use std::collections::BTreeMap;
use std::time::Duration;

use concord::coordinator::{spawn_maintenance, ServiceSpec};
use concord::error::{ConcordErrorTrait, ErrorKind};
use proptest::prelude::*;

use super::fixtures::{provider, TestCoordinator, EXPIRY, START};

// ============================================================================
// Expiry and Routing
// ============================================================================

#[tokio::test]
async fn test_sweep_evicts_silent_provider_and_routing_follows() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("svc1", provider(8001)).await.unwrap();
    registry.register("svc1", provider(8002)).await.unwrap();
    let token = registry.subscribe("svc1").await.unwrap();

    // Only 8001 keeps heartbeating
    t.advance_secs(20);
    registry.heartbeat("svc1", &provider(8001)).await.unwrap();
    t.advance_secs(15);

    let report = t.coordinator.sweep().await;
    assert_eq!(
        report.evicted,
        vec![("svc1".to_string(), "A:8002".to_string())]
    );

    for _ in 0..5 {
        let route = registry.route("svc1", &token).await.unwrap();
        assert_eq!(route.address(), "A:8001");
        assert_eq!(route.candidates, 1);
    }

    // The evicted provider is gone, not merely hidden
    let view = registry.get_service("svc1").await.unwrap();
    assert_eq!(view.providers.len(), 1);
    assert_eq!(view.subscriber_count, 1);
}

#[tokio::test]
async fn test_stale_provider_skipped_before_sweep() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("svc1", provider(8001)).await.unwrap();
    registry.register("svc1", provider(8002)).await.unwrap();
    let token = registry.subscribe("svc1").await.unwrap();

    t.advance_secs(10);
    registry.heartbeat("svc1", &provider(8002)).await.unwrap();
    t.advance_secs(25);

    // No sweep has run: 8001 is still registered but past expiry
    assert_eq!(registry.get_service("svc1").await.unwrap().providers.len(), 2);
    for _ in 0..4 {
        let route = registry.route("svc1", &token).await.unwrap();
        assert_eq!(route.address(), "A:8002");
    }

    t.advance_secs(60);
    let err = registry.route("svc1", &token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn test_round_robin_spreads_over_live_providers() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    for port in [8001, 8002, 8003] {
        registry.register("svc1", provider(port)).await.unwrap();
    }
    let token = registry.subscribe("svc1").await.unwrap();

    let mut hits: BTreeMap<String, usize> = BTreeMap::new();
    for _ in 0..9 {
        let route = registry.route("svc1", &token).await.unwrap();
        *hits.entry(route.address()).or_default() += 1;
    }

    assert_eq!(hits.len(), 3);
    assert!(hits.values().all(|&count| count == 3));
}

#[tokio::test]
async fn test_route_requires_subscription() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("svc1", provider(8001)).await.unwrap();

    let err = registry.route("svc1", "not-a-token").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let err = registry.route("missing", "not-a-token").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_reregister_and_unknown_heartbeat() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("svc1", provider(8001)).await.unwrap();

    let err = registry.register("svc1", provider(8001)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = registry.heartbeat("svc1", &provider(9999)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = registry.heartbeat("nope", &provider(8001)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Clusters
// ============================================================================

#[tokio::test]
async fn test_cluster_heartbeat_keeps_members_alive() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("s1", provider(8001)).await.unwrap();
    registry.register("s2", provider(8002)).await.unwrap();
    registry.register("s2", provider(8003)).await.unwrap();
    registry.register("outside", provider(9000)).await.unwrap();

    registry
        .add_to_cluster("c1", &["s1".to_string(), "s2".to_string()])
        .await
        .unwrap();

    t.advance_secs(25);
    let beat = registry.cluster_heartbeat("c1").await.unwrap();
    assert_eq!(beat.services, 2);
    assert_eq!(beat.endpoints, 3);

    t.advance_secs(25);
    let report = t.coordinator.sweep().await;

    assert_eq!(
        report.evicted,
        vec![("outside".to_string(), "A:9000".to_string())]
    );
    let members = registry.cluster_services("c1").await.unwrap();
    let providers: usize = members.iter().map(|s| s.providers.len()).sum();
    assert_eq!(providers, 3);
}

#[tokio::test]
async fn test_cluster_membership_rules() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry
        .create_service(Some("s1".to_string()), ServiceSpec::default())
        .await
        .unwrap();

    let err = registry
        .add_to_cluster("c1", &["ghost".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    registry.add_to_cluster("c1", &["s1".to_string()]).await.unwrap();
    let err = registry
        .add_to_cluster("c2", &["s1".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = registry.cluster_heartbeat("c9").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Deleting a service drops its membership
    registry.delete_service("s1").await.unwrap();
    assert_eq!(registry.cluster_of("s1").await, None);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deregister_races_sweep_exactly_once() {
    for _ in 0..20 {
        let t = TestCoordinator::new();
        let registry = t.coordinator.registry();

        registry.register("svc1", provider(8001)).await.unwrap();
        t.advance_secs(31);

        let coordinator = t.coordinator.clone();
        let sweep = tokio::spawn(async move { coordinator.sweep().await });
        let coordinator = t.coordinator.clone();
        let deregister = tokio::spawn(async move {
            coordinator
                .registry()
                .deregister("svc1", &provider(8001))
                .await
        });

        let report = sweep.await.unwrap();
        let deregistered = deregister.await.unwrap();

        let removals = report.evicted.len() + usize::from(deregistered.is_ok());
        assert_eq!(removals, 1);
        if let Err(e) = deregistered {
            assert_eq!(e.kind(), ErrorKind::NotFound);
        }

        let view = registry.get_service("svc1").await.unwrap();
        assert!(view.providers.is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_heartbeats_across_services() {
    let t = TestCoordinator::new();

    let mut tasks = Vec::new();
    for n in 0..16u16 {
        let coordinator = t.coordinator.clone();
        tasks.push(tokio::spawn(async move {
            let service_id = format!("svc{}", n % 4);
            let endpoint = provider(8000 + n);
            coordinator
                .registry()
                .register(&service_id, endpoint.clone())
                .await
                .unwrap();
            for _ in 0..10 {
                coordinator
                    .registry()
                    .heartbeat(&service_id, &endpoint)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = t.coordinator.registry().stats().await;
    assert_eq!(stats.services, 4);
    assert_eq!(stats.registrations, 16);
}

// ============================================================================
// Maintenance Loop
// ============================================================================

#[tokio::test]
async fn test_maintenance_loop_sweeps_and_dumps() {
    let t = TestCoordinator::new();
    let registry = t.coordinator.registry();

    registry.register("svc1", provider(8001)).await.unwrap();
    registry.register("svc1", provider(8002)).await.unwrap();

    let handle = spawn_maintenance(t.coordinator.clone(), Duration::from_millis(50));
    assert!(handle.is_running());

    t.advance_secs(20);
    registry.heartbeat("svc1", &provider(8001)).await.unwrap();
    t.advance_secs(20);

    let mut evicted = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if registry.get_service("svc1").await.unwrap().providers.len() == 1 {
            evicted = true;
            break;
        }
    }
    assert!(evicted, "maintenance loop should evict the silent provider");

    assert!(matches!(handle.stop(true).await, Some(Ok(()))));

    let status = t.coordinator.persistence_status().await;
    assert!(status.dumps >= 2);
    assert!(status.is_healthy());
    assert!(t.backend.contents().await.is_some());
}

#[tokio::test]
async fn test_maintenance_stop_without_final_dump() {
    let t = TestCoordinator::new();

    let handle = spawn_maintenance(t.coordinator.clone(), Duration::from_secs(3600));
    assert!(handle.stop(false).await.is_none());

    assert_eq!(t.coordinator.persistence_status().await.dumps, 0);
    assert!(t.backend.contents().await.is_none());
}

// ============================================================================
// Lockstep model
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Register(u16),
    Deregister(u16),
    Heartbeat(u16),
    Advance(u64),
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (8001u16..8005).prop_map(Op::Register),
        (8001u16..8005).prop_map(Op::Deregister),
        (8001u16..8005).prop_map(Op::Heartbeat),
        (1u64..20).prop_map(Op::Advance),
        Just(Op::Sweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_registry_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        tokio_test::block_on(async {
            let t = TestCoordinator::new();
            let registry = t.coordinator.registry();
            let expiry = EXPIRY.as_millis() as i64;

            // port -> last heartbeat
            let mut model: BTreeMap<u16, i64> = BTreeMap::new();
            let mut now = START;

            for op in ops {
                match op {
                    Op::Register(port) => {
                        let result = registry.register("svc", provider(port)).await;
                        if model.contains_key(&port) {
                            assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
                        } else {
                            assert!(result.is_ok());
                            model.insert(port, now);
                        }
                    }
                    Op::Deregister(port) => {
                        let result = registry.deregister("svc", &provider(port)).await;
                        assert_eq!(result.is_ok(), model.remove(&port).is_some());
                    }
                    Op::Heartbeat(port) => {
                        let result = registry.heartbeat("svc", &provider(port)).await;
                        match model.get_mut(&port) {
                            Some(last) => {
                                assert!(result.is_ok());
                                *last = now;
                            }
                            None => assert!(result.is_err()),
                        }
                    }
                    Op::Advance(secs) => {
                        t.advance_secs(secs);
                        now += secs as i64 * 1000;
                    }
                    Op::Sweep => {
                        t.coordinator.sweep().await;
                        model.retain(|_, last| now - *last <= expiry);
                    }
                }

                let actual: BTreeMap<u16, i64> = match registry.get_service("svc").await {
                    Ok(view) => view
                        .providers
                        .iter()
                        .map(|p| (p.endpoint.port, p.last_heartbeat.unwrap_or(i64::MIN)))
                        .collect(),
                    Err(_) => BTreeMap::new(),
                };
                assert_eq!(actual, model);
            }
        });
    }
}
