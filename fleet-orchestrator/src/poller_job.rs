use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;

use fleet_common::{FleetSnapshot, Instance, InstanceFlag};
use fleet_providers::InstanceRecord;

use crate::remaining_cooldown;
use crate::state::AppState;

/// Continuously refresh the live view of the fleet from the provider.
pub async fn run(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.poll_interval_secs);
    while !state.shutting_down() {
        let started = Instant::now();
        if let Some(snapshot) = poll_all_zones(&state).await {
            *state.live.write().await = snapshot;
        }
        tokio::time::sleep(remaining_cooldown(started, interval)).await;
    }
}

/// Poll every configured zone concurrently. A single failed zone aborts the
/// whole cycle so the previous snapshot stays in place; a partial view would
/// look like mass deletion to the reconciler.
pub async fn poll_all_zones(state: &AppState) -> Option<FleetSnapshot> {
    let listings = join_all(
        state
            .config
            .zones
            .iter()
            .map(|zone| state.gateway.list_instances(zone)),
    )
    .await;

    let mut instances = Vec::new();
    for listing in listings {
        match listing {
            Some(records) => instances.extend(
                records
                    .into_iter()
                    .filter(|r| is_managed(&state.config, &r.name))
                    .map(instance_from_record),
            ),
            None => {
                tracing::warn!("zone poll failed; keeping previous fleet view");
                return None;
            }
        }
    }
    Some(FleetSnapshot::from_instances(instances))
}

fn is_managed(config: &crate::config::Config, name: &str) -> bool {
    if config.excluded_instances.iter().any(|n| n == name) {
        return false;
    }
    config.instance_name_prefixes.is_empty()
        || config
            .instance_name_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
}

fn instance_from_record(record: InstanceRecord) -> Instance {
    let creation_timestamp = record.creation_timestamp.as_deref().and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| tracing::warn!("bad creation timestamp on {}: {}", record.name, e))
            .ok()
    });
    Instance {
        name: record.name,
        zone: record.zone,
        machine_type: record.machine_type,
        ip: record.ip,
        creation_timestamp,
        preemptible: record.preemptible,
        status: record.status,
        flag: InstanceFlag::New,
        uptime_hour: 0.0,
    }
}
