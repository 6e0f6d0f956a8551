//! Isolation and single-probe recovery across the balancer, tracker and
//! trying-chance coordinator.

use std::sync::Arc;

use discovery_runtime::clock::{Clock, ManualClock};
use discovery_runtime::config::{DiscoveryConfig, IsolationConfig};
use discovery_runtime::health::{InvocationId, TryingChanceCoordinator};
use discovery_runtime::load_balancer::{BalancerError, ServiceLoadBalancer};
use discovery_runtime::registry::{LocalRegistryClient, MicroserviceCacheKey, RegistryCacheStore};

const REGISTRY: &str = r#"
    [[services.orders]]
    app_id = "shop"
    version = "1.0.0"

    [[services.orders.instances]]
    endpoints = ["rest://10.0.0.1:8080"]

    [[services.orders.instances]]
    endpoints = ["rest://10.0.0.2:8080"]
"#;

struct Harness {
    balancer: ServiceLoadBalancer,
    clock: ManualClock,
    key: MicroserviceCacheKey,
}

fn harness(isolation: IsolationConfig) -> Harness {
    let config = DiscoveryConfig {
        isolation,
        ..Default::default()
    };
    let clock = ManualClock::new(1_000);
    let registry = Arc::new(LocalRegistryClient::from_toml_str(REGISTRY).unwrap());
    let store = Arc::new(RegistryCacheStore::new(registry, &config.registry));
    let balancer = ServiceLoadBalancer::from_config(&config, store, Arc::new(clock.clone()));

    Harness {
        balancer,
        clock,
        key: MicroserviceCacheKey::all_versions("consumer", "shop", "orders"),
    }
}

#[tokio::test]
async fn test_failing_server_is_isolated_and_traffic_moves() {
    let h = harness(IsolationConfig {
        continuous_failure_threshold: 3,
        min_request_count: 3,
        ..Default::default()
    });

    // Fail every call to the first server, succeed on the other.
    let first = h.balancer.choose(&h.key, InvocationId::new()).await.unwrap();
    let bad = first.instance.instance_id.clone();
    h.balancer.on_invocation_finished(&first, false);
    for _ in 0..7 {
        let chosen = h.balancer.choose(&h.key, InvocationId::new()).await.unwrap();
        let ok = chosen.instance.instance_id != bad;
        h.balancer.on_invocation_finished(&chosen, ok);
    }

    let stats = h.balancer.tracker().get(&bad).unwrap();
    assert!(stats.continuous_failure_count() >= 3);

    for _ in 0..10 {
        let chosen = h.balancer.choose(&h.key, InvocationId::new()).await.unwrap();
        assert_ne!(chosen.instance.instance_id, bad);
        assert!(!chosen.probe);
        h.balancer.on_invocation_finished(&chosen, true);
    }
}

#[tokio::test]
async fn test_only_one_probe_until_released_or_expired() {
    let h = harness(IsolationConfig {
        continuous_failure_threshold: 1,
        min_request_count: 1,
        single_test_time_ms: 10_000,
        ..Default::default()
    });

    // Both servers fail once and become isolated.
    for _ in 0..2 {
        let chosen = h.balancer.choose(&h.key, InvocationId::new()).await.unwrap();
        h.balancer.on_invocation_finished(&chosen, false);
    }
    assert!(matches!(
        h.balancer.choose(&h.key, InvocationId::new()).await,
        Err(BalancerError::NoAvailableServer(_))
    ));

    h.clock.advance(10_001);
    let probe = h.balancer.choose(&h.key, InvocationId::new()).await.unwrap();
    assert!(probe.probe);
    assert_eq!(h.balancer.coordinator().current_holder(), Some(probe.invocation));

    // The other isolated server is quiet long enough too, but the permit is taken.
    assert!(h.balancer.choose(&h.key, InvocationId::new()).await.is_err());

    // The holder never reports back; the permit expires after its TTL.
    h.clock.advance(60_000);
    let next = h.balancer.choose(&h.key, InvocationId::new()).await.unwrap();
    assert!(next.probe);
    assert_ne!(next.invocation, probe.invocation);

    // A stale report from the first probe does not release the new holder.
    h.balancer.on_invocation_finished(&probe, false);
    assert_eq!(h.balancer.coordinator().current_holder(), Some(next.invocation));

    h.balancer.on_invocation_finished(&next, true);
    assert_eq!(h.balancer.coordinator().current_holder(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_probe_applications() {
    let clock = ManualClock::new(0);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let coordinator = Arc::new(TryingChanceCoordinator::new(shared, 60_000));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.apply_for_trying_chance(InvocationId::new()) })
        })
        .collect();

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);

    clock.advance(60_000);
    assert!(coordinator.apply_for_trying_chance(InvocationId::new()));
}
