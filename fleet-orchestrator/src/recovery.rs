use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_common::{Instance, InstanceFlag, InstanceStatus};

use crate::placement::ZoneRanker;
use crate::state::AppState;

const SETTLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where and as what a terminated instance comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryTarget {
    pub preemptible: bool,
    pub zone: String,
}

/// Decide the recovery strategy for a terminated instance.
///
/// Non-preemptible instances convert back to preemptible in place. A
/// preemptible instance gets one free restart in place (recycle); once it
/// has been recycled and terminates again, it either relocates to a better
/// zone or, when preemptible supply is low everywhere, converts to
/// non-preemptible in the least loaded stable zone.
pub fn plan_recovery(instance: &Instance, ranker: &ZoneRanker) -> RecoveryTarget {
    let same_zone = || RecoveryTarget {
        preemptible: true,
        zone: instance.zone.clone(),
    };
    if !instance.preemptible || instance.flag != InstanceFlag::Recycled {
        return same_zone();
    }
    if !ranker.global_low_supply() {
        if let Some(candidate) = ranker.select_zone_candidate() {
            if candidate.zone != instance.zone {
                return RecoveryTarget {
                    preemptible: true,
                    zone: candidate.zone.clone(),
                };
            }
            return RecoveryTarget {
                preemptible: false,
                zone: candidate.zone.clone(),
            };
        }
    }
    let zone = ranker
        .rank_by_instance_count(false)
        .first()
        .map(|s| s.zone.clone())
        .unwrap_or_else(|| instance.zone.clone());
    RecoveryTarget {
        preemptible: false,
        zone,
    }
}

/// Keeps the in-flight recovery counter accurate even when the task exits
/// early; persistence is skipped while it is non-zero.
struct RecoveryGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> RecoveryGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Full recovery of one terminated instance: wait for the termination to
/// settle, plan a target, then restart or recreate accordingly.
pub async fn process_terminated_instance(state: Arc<AppState>, instance: Instance) {
    let _guard = RecoveryGuard::new(&state.recovering);

    // The provider forbids concurrent operations on the same instance, so
    // wait until the termination fully settles.
    loop {
        if state.shutting_down() {
            return;
        }
        let current = state.live.read().await.instance(&instance.name).cloned();
        match current {
            None => {
                tracing::info!(
                    "{} disappeared while settling; skipping recovery",
                    instance.name
                );
                return;
            }
            Some(live) if live.status == InstanceStatus::Terminated => break,
            Some(_) => tokio::time::sleep(SETTLE_POLL_INTERVAL).await,
        }
    }

    let target = {
        let cache = state.cache.lock().await;
        let live = state.live.read().await;
        let ranker = ZoneRanker::new(&state.config, &cache, &live);
        plan_recovery(&instance, &ranker)
    };
    recover_instance(&state, &instance, target).await;
}

/// Execute the planned recovery. A same-zone same-type target is a plain
/// restart; anything else requires recreating the instance, since zone and
/// preemptibility are fixed at creation.
pub async fn recover_instance(state: &AppState, instance: &Instance, target: RecoveryTarget) {
    if target.zone != instance.zone {
        // Move the slot eagerly so concurrent placement decisions see it.
        let mut cache = state.cache.lock().await;
        cache.zone_or_default(&instance.zone).instance_count -= 1;
        cache.zone_or_default(&target.zone).instance_count += 1;
    }

    if instance.preemptible == target.preemptible && instance.zone == target.zone {
        if state.gateway.start_instance(&target.zone, &instance.name).await.is_none() {
            tracing::error!("restart of {} in {} failed", instance.name, target.zone);
        }
        return;
    }

    let Some(delete_op) = state
        .gateway
        .delete_instance(&instance.zone, &instance.name)
        .await
    else {
        tracing::error!("deletion of {} in {} failed; recovery aborted", instance.name, instance.zone);
        return;
    };
    if state.gateway.wait_for_operation(&delete_op).await.is_none() {
        tracing::error!(
            "deletion of {} in {} did not settle; recovery aborted",
            instance.name,
            instance.zone
        );
        return;
    }

    // The boot disk may have survived an earlier recreation, in which case
    // disk creation fails and the existing disk is reused.
    match state
        .gateway
        .create_disk_from_snapshot(&target.zone, &instance.name)
        .await
    {
        Some(disk_op) => {
            let _ = state.gateway.wait_for_operation(&disk_op).await;
        }
        None => tracing::warn!(
            "disk creation for {} in {} skipped",
            instance.name,
            target.zone
        ),
    }

    match state
        .gateway
        .create_instance(&target.zone, &instance.name, &instance.name, target.preemptible)
        .await
    {
        Some(create_op) => {
            let _ = state.gateway.wait_for_operation(&create_op).await;
        }
        None => tracing::error!(
            "recreation of {} in {} failed",
            instance.name,
            target.zone
        ),
    }
}
