use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use fleet_common::FleetSnapshot;
use fleet_providers::ComputeProvider;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::gateway::Gateway;
use crate::notifier::Notifier;

/// Everything the jobs share. Lock order is cache before live; never take
/// them in the other order.
pub struct AppState {
    pub config: Config,
    pub gateway: Gateway,
    /// Latest successful poll of the provider, replaced wholesale.
    pub live: RwLock<FleetSnapshot>,
    /// Accumulated view with uptime, flags and termination history.
    pub cache: Mutex<FleetSnapshot>,
    pub store: CacheStore,
    /// Number of recoveries currently in flight.
    pub recovering: AtomicUsize,
    pub shutdown: Arc<AtomicBool>,
    pub notifier: Notifier,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn ComputeProvider>) -> Arc<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let store = CacheStore::new(config.cache_dir.clone());
        let mut cache = store.load(&config.project_id).unwrap_or_default();
        // Newly configured zones enter the cache with zeroed history.
        for zone_name in &config.zones {
            cache.zone_or_default(zone_name);
        }
        let notifier = Notifier::new(&config);
        Arc::new(Self {
            gateway: Gateway::new(provider, shutdown.clone()),
            live: RwLock::new(FleetSnapshot::default()),
            cache: Mutex::new(cache),
            store,
            recovering: AtomicUsize::new(0),
            shutdown,
            notifier,
            dispatcher: Dispatcher::new(),
            config,
        })
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Persist the cache unless a recovery is mid-flight; a snapshot taken
    /// then would disagree with the provider once the recovery lands.
    pub async fn persist_cache_if_idle(&self) {
        if self.recovering.load(Ordering::SeqCst) > 0 {
            return;
        }
        self.persist_cache().await;
    }

    pub async fn persist_cache(&self) {
        let cache = self.cache.lock().await;
        if let Err(e) = self.store.save(&self.config.project_id, &cache) {
            tracing::error!("cache persistence failed: {:#}", e);
        }
    }

    /// Refresh each cached zone's instance count from the live view.
    pub async fn sync_zone_instance_counts(&self) {
        let live = self.live.read().await.clone();
        let mut cache = self.cache.lock().await;
        for zone_name in &self.config.zones {
            cache.zone_or_default(zone_name).instance_count =
                live.instance_count_in(zone_name) as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::base_config;
    use fleet_common::{Instance, InstanceFlag, InstanceStatus};
    use fleet_providers::mock::MockProvider;

    fn state_with_temp_cache(tag: &str) -> Arc<AppState> {
        let mut config = base_config();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("fleet-state-{}-{}", tag, nonce));
        std::fs::create_dir_all(&dir).unwrap();
        config.cache_dir = Some(dir);
        AppState::new(config, Arc::new(MockProvider::new()))
    }

    #[tokio::test]
    async fn configured_zones_are_seeded_into_the_cache() {
        let state = state_with_temp_cache("seed");
        let cache = state.cache.lock().await;
        for zone in ["us-a", "us-b", "us-c"] {
            assert!(cache.has_zone(zone));
        }
    }

    #[tokio::test]
    async fn persistence_is_skipped_while_recovering() {
        let state = state_with_temp_cache("gate");
        state.recovering.fetch_add(1, Ordering::SeqCst);
        state.persist_cache_if_idle().await;
        assert!(state.store.load(&state.config.project_id).is_none());

        state.recovering.fetch_sub(1, Ordering::SeqCst);
        state.persist_cache_if_idle().await;
        assert!(state.store.load(&state.config.project_id).is_some());
    }

    #[tokio::test]
    async fn zone_instance_counts_follow_the_live_view() {
        let state = state_with_temp_cache("counts");
        {
            let mut live = state.live.write().await;
            live.upsert_instance(Instance {
                name: "web-1".to_string(),
                zone: "us-b".to_string(),
                machine_type: "n1-standard-1".to_string(),
                ip: None,
                creation_timestamp: None,
                preemptible: true,
                status: InstanceStatus::Running,
                flag: InstanceFlag::New,
                uptime_hour: 0.0,
            });
        }
        state.sync_zone_instance_counts().await;
        let cache = state.cache.lock().await;
        assert_eq!(cache.zone("us-b").unwrap().instance_count, 1);
        assert_eq!(cache.zone("us-a").unwrap().instance_count, 0);
    }
}
