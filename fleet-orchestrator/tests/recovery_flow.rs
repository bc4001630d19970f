use std::sync::Arc;

use fleet_common::{Instance, InstanceFlag, InstanceStatus};
use fleet_orchestrator::config::Config;
use fleet_orchestrator::placement::ZoneRanker;
use fleet_orchestrator::recovery::{self, plan_recovery, RecoveryTarget};
use fleet_orchestrator::state::AppState;
use fleet_orchestrator::{poller_job, reconciler};
use fleet_providers::mock::MockProvider;
use fleet_providers::{ComputeProvider, InstanceRecord};

fn test_config(tag: &str) -> Config {
    let config: Config = serde_yaml::from_str(
        r#"
project_id: test-project
provider: mock
snapshot_source: global/snapshots/fleet-base
machine_type: n1-standard-1
zones: [us-a, us-b, us-c]
min_instance_count: 3
min_zone_spread: 2
non_preemptible_min_alive_hours: 12.0
high_demand_zone_fraction: 0.5
"#,
    )
    .unwrap();
    let mut config = config;
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("fleet-it-{}-{}", tag, nonce));
    std::fs::create_dir_all(&dir).unwrap();
    config.cache_dir = Some(dir);
    config
}

fn record(name: &str, zone: &str, preemptible: bool) -> InstanceRecord {
    InstanceRecord {
        name: name.to_string(),
        zone: zone.to_string(),
        machine_type: "n1-standard-1".to_string(),
        ip: Some("10.0.0.1".to_string()),
        creation_timestamp: None,
        preemptible,
        status: InstanceStatus::Running,
    }
}

fn terminated(name: &str, zone: &str, preemptible: bool, flag: InstanceFlag) -> Instance {
    Instance {
        name: name.to_string(),
        zone: zone.to_string(),
        machine_type: "n1-standard-1".to_string(),
        ip: None,
        creation_timestamp: None,
        preemptible,
        status: InstanceStatus::Terminated,
        flag,
        uptime_hour: 9.0,
    }
}

async fn refresh_live(state: &Arc<AppState>) {
    let snapshot = poller_job::poll_all_zones(state).await.unwrap();
    *state.live.write().await = snapshot;
}

#[tokio::test]
async fn first_preemption_restarts_in_place() {
    let provider = Arc::new(MockProvider::new());
    provider.seed_instance(record("web-1", "us-a", true));
    provider.set_status("web-1", InstanceStatus::Terminated);
    let state = AppState::new(test_config("restart"), provider.clone());
    refresh_live(&state).await;

    recovery::process_terminated_instance(
        state.clone(),
        terminated("web-1", "us-a", true, InstanceFlag::New),
    )
    .await;

    assert_eq!(provider.calls(), vec!["start_instance:us-a:web-1".to_string()]);
}

#[tokio::test]
async fn recycled_preemption_relocates_with_recreate() {
    let provider = Arc::new(MockProvider::new());
    // us-a is crowded; us-b and us-c are empty and calm.
    provider.seed_instance(record("web-1", "us-a", true));
    provider.seed_instance(record("web-2", "us-a", true));
    provider.set_status("web-2", InstanceStatus::Terminated);
    let state = AppState::new(test_config("relocate"), provider.clone());
    refresh_live(&state).await;
    state.sync_zone_instance_counts().await;

    recovery::process_terminated_instance(
        state.clone(),
        terminated("web-2", "us-a", true, InstanceFlag::Recycled),
    )
    .await;

    let calls = provider.calls();
    assert_eq!(calls[0], "delete_instance:us-a:web-2");
    assert!(calls[1].starts_with("create_disk:us-b:web-2"));
    assert_eq!(calls[2], "create_instance:us-b:web-2");

    // The slot moved eagerly so later placement decisions see it.
    let cache = state.cache.lock().await;
    assert_eq!(cache.zone("us-a").unwrap().instance_count, 1);
    assert_eq!(cache.zone("us-b").unwrap().instance_count, 1);
}

#[tokio::test]
async fn conversion_recreates_as_non_preemptible() {
    let provider = Arc::new(MockProvider::new());
    provider.seed_instance(record("web-1", "us-a", true));
    provider.set_status("web-1", InstanceStatus::Terminated);
    let state = AppState::new(test_config("convert"), provider.clone());
    refresh_live(&state).await;

    recovery::recover_instance(
        &state,
        &terminated("web-1", "us-a", true, InstanceFlag::Recycled),
        RecoveryTarget {
            preemptible: false,
            zone: "us-a".to_string(),
        },
    )
    .await;

    let calls = provider.calls();
    assert_eq!(calls[0], "delete_instance:us-a:web-1");
    assert_eq!(calls[2], "create_instance:us-a:web-1");
    let listed = provider.list_instances("us-a").await.unwrap();
    assert!(!listed[0].preemptible);
}

#[tokio::test(start_paused = true)]
async fn unsettled_deletion_aborts_before_any_create_call() {
    let provider = Arc::new(MockProvider::new());
    provider.seed_instance(record("web-1", "us-a", true));
    provider.set_status("web-1", InstanceStatus::Terminated);
    provider.fail_operation_polls();
    let state = AppState::new(test_config("abort"), provider.clone());
    refresh_live(&state).await;

    recovery::recover_instance(
        &state,
        &terminated("web-1", "us-a", true, InstanceFlag::Recycled),
        RecoveryTarget {
            preemptible: false,
            zone: "us-a".to_string(),
        },
    )
    .await;

    // The delete was issued, but with its operation never confirmed no
    // disk or instance creation may follow.
    assert_eq!(provider.calls(), vec!["delete_instance:us-a:web-1".to_string()]);
}

#[tokio::test]
async fn maturity_scenario_recycles_without_counting_termination() {
    let provider = Arc::new(MockProvider::new());
    provider.seed_instance(record("web-1", "us-a", true));
    let state = AppState::new(test_config("maturity"), provider.clone());
    refresh_live(&state).await;

    // One simulated hour per tick.
    let params = reconciler::ReconcileParams {
        tick_hours: 1.0,
        maturity_hours: 23.0,
        non_preemptible_min_alive_hours: 12.0,
    };

    let live = state.live.read().await.clone();
    {
        let mut cache = state.cache.lock().await;
        reconciler::reconcile(&mut cache, &live, params); // created + started
        for _ in 0..23 {
            reconciler::reconcile(&mut cache, &live, params);
        }
        assert_eq!(cache.instance("web-1").unwrap().flag, InstanceFlag::Matured);
    }

    // Tick 24: the provider force-terminates at the 24h mark.
    provider.set_status("web-1", InstanceStatus::Terminated);
    refresh_live(&state).await;
    let live = state.live.read().await.clone();
    let mut cache = state.cache.lock().await;
    let outcome = reconciler::reconcile(&mut cache, &live, params);

    // Matured before termination, so the zone keeps a clean record.
    assert_eq!(cache.zone("us-a").unwrap().total_termination_count, 0);
    let event = &outcome.events[0];
    assert_eq!(event.kind(), "terminated");
    assert_eq!(event.instance().flag, InstanceFlag::Matured);

    // The recycle path restarts it in place.
    let ranker = ZoneRanker::new(&state.config, &cache, &live);
    let target = plan_recovery(event.instance(), &ranker);
    assert_eq!(
        target,
        RecoveryTarget {
            preemptible: true,
            zone: "us-a".to_string()
        }
    );
}

#[tokio::test]
async fn cache_is_not_persisted_while_a_recovery_is_in_flight() {
    let provider = Arc::new(MockProvider::new());
    provider.seed_instance(record("web-1", "us-a", true));
    let state = AppState::new(test_config("persist-gate"), provider.clone());
    refresh_live(&state).await;

    state
        .recovering
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    state.persist_cache_if_idle().await;
    assert!(state.store.load("test-project").is_none());

    state
        .recovering
        .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    state.persist_cache_if_idle().await;
    let persisted = state.store.load("test-project").unwrap();
    assert!(persisted.has_zone("us-a"));
}
