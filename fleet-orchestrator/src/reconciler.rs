use fleet_common::events::FleetEvent;
use fleet_common::{FleetSnapshot, Instance, InstanceFlag, InstanceStatus};

use crate::config::Config;

/// Tunables the reconcile pass needs from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileParams {
    pub tick_hours: f64,
    pub maturity_hours: f64,
    pub non_preemptible_min_alive_hours: f64,
}

impl From<&Config> for ReconcileParams {
    fn from(config: &Config) -> Self {
        Self {
            tick_hours: config.tick_hours(),
            maturity_hours: config.maturity_hours,
            non_preemptible_min_alive_hours: config.non_preemptible_min_alive_hours,
        }
    }
}

/// What one reconcile pass produced: lifecycle events to dispatch and
/// matured non-preemptible instances to stop.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub events: Vec<FleetEvent>,
    pub stop_requests: Vec<(String, String)>,
}

/// Fold the live view into the cached view, accumulating uptime, latching
/// maturity, rotating flags on termination and emitting one event per
/// observed transition.
pub fn reconcile(
    cache: &mut FleetSnapshot,
    live: &FleetSnapshot,
    params: ReconcileParams,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    // Instances gone from the live view were deleted out of band.
    let deleted: Vec<String> = cache
        .instance_names()
        .into_iter()
        .filter(|name| !live.has_instance(name))
        .collect();
    for name in deleted {
        if let Some(instance) = cache.remove_instance(&name) {
            outcome.events.push(FleetEvent::Deleted(instance));
        }
    }

    for live_instance in live.instances() {
        let cached = cache.instance(&live_instance.name).cloned();
        let mut next = live_instance.clone();

        if cached.is_none() {
            outcome.events.push(FleetEvent::Created(next.clone()));
        }
        let (previous_status, flag, uptime) = match &cached {
            Some(c) => (Some(c.status), c.flag, c.uptime_hour),
            None => (None, InstanceFlag::New, 0.0),
        };
        next.flag = flag;
        next.uptime_hour = uptime;

        if next.status == InstanceStatus::Running {
            if previous_status != Some(InstanceStatus::Running) {
                next.uptime_hour = 0.0;
                outcome.events.push(FleetEvent::Started(next.clone()));
            } else {
                next.uptime_hour += params.tick_hours;
                let zone = cache.zone_or_default(&next.zone);
                if next.preemptible {
                    zone.preemptible_uptime_hour += params.tick_hours;
                } else {
                    zone.non_preemptible_uptime_hour += params.tick_hours;
                }
                if instance_matured(&next, params) {
                    next.flag = InstanceFlag::Matured;
                }
                if !next.preemptible && next.flag == InstanceFlag::Matured {
                    // Stop long-lived non-preemptible instances so they
                    // recover back into the preemptible pool.
                    outcome
                        .stop_requests
                        .push((next.zone.clone(), next.name.clone()));
                } else {
                    outcome.events.push(FleetEvent::Running(next.clone()));
                }
            }
        } else if previous_status == Some(InstanceStatus::Running) {
            // Leaving Running counts as a termination even while the
            // provider still reports Stopping.
            // Matured stops are deliberate and do not count against the
            // zone's termination history.
            if next.flag != InstanceFlag::Matured {
                cache.zone_or_default(&next.zone).total_termination_count += 1;
            }
            outcome.events.push(FleetEvent::Terminated(next.clone()));
            next.flag = rotate_flag_on_termination(&next);
        }

        cache.upsert_instance(next);
    }

    outcome
}

/// Preemptible instances latch maturity once, shortly before the provider's
/// 24-hour forced termination. Non-preemptible maturity is re-evaluated each
/// tick against the minimum alive time.
fn instance_matured(instance: &Instance, params: ReconcileParams) -> bool {
    if instance.preemptible {
        instance.flag != InstanceFlag::Matured && instance.uptime_hour >= params.maturity_hours
    } else {
        instance.uptime_hour > params.non_preemptible_min_alive_hours
    }
}

/// Flag carried into the instance's next life. An already-recycled
/// preemptible instance starts over as new; everything else alternates.
fn rotate_flag_on_termination(instance: &Instance) -> InstanceFlag {
    if instance.preemptible && instance.flag == InstanceFlag::New {
        InstanceFlag::Recycled
    } else {
        InstanceFlag::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ReconcileParams {
        ReconcileParams {
            tick_hours: 1.0, // one simulated hour per tick
            maturity_hours: 23.0,
            non_preemptible_min_alive_hours: 12.0,
        }
    }

    fn instance(name: &str, status: InstanceStatus, preemptible: bool) -> Instance {
        Instance {
            name: name.to_string(),
            zone: "us-a".to_string(),
            machine_type: "n1-standard-1".to_string(),
            ip: Some("10.0.0.1".to_string()),
            creation_timestamp: None,
            preemptible,
            status,
            flag: InstanceFlag::New,
            uptime_hour: 0.0,
        }
    }

    fn live_with(instances: Vec<Instance>) -> FleetSnapshot {
        let mut live = FleetSnapshot::default();
        for i in instances {
            live.upsert_instance(i);
        }
        live
    }

    #[test]
    fn new_running_instance_fires_created_and_started() {
        let mut cache = FleetSnapshot::default();
        let live = live_with(vec![instance("web-1", InstanceStatus::Running, true)]);
        let outcome = reconcile(&mut cache, &live, params());
        let kinds: Vec<&str> = outcome.events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["created", "started"]);
        assert_eq!(cache.instance("web-1").unwrap().uptime_hour, 0.0);
    }

    #[test]
    fn disappeared_instance_fires_deleted() {
        let mut cache = FleetSnapshot::default();
        cache.upsert_instance(instance("web-1", InstanceStatus::Running, true));
        let outcome = reconcile(&mut cache, &FleetSnapshot::default(), params());
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind(), "deleted");
        assert!(!cache.has_instance("web-1"));
    }

    #[test]
    fn running_instance_accrues_uptime_and_zone_uptime() {
        let mut cache = FleetSnapshot::default();
        cache.upsert_instance(instance("web-1", InstanceStatus::Running, true));
        let live = live_with(vec![instance("web-1", InstanceStatus::Running, true)]);
        let outcome = reconcile(&mut cache, &live, params());
        assert_eq!(outcome.events[0].kind(), "running");
        assert_eq!(cache.instance("web-1").unwrap().uptime_hour, 1.0);
        assert_eq!(cache.zone("us-a").unwrap().preemptible_uptime_hour, 1.0);
    }

    #[test]
    fn preemptible_maturity_latches_before_forced_termination() {
        let mut cache = FleetSnapshot::default();
        cache.upsert_instance(instance("web-1", InstanceStatus::Running, true));
        let live = live_with(vec![instance("web-1", InstanceStatus::Running, true)]);
        for _ in 0..23 {
            reconcile(&mut cache, &live, params());
        }
        assert_eq!(cache.instance("web-1").unwrap().flag, InstanceFlag::Matured);
    }

    #[test]
    fn matured_non_preemptible_is_stopped_instead_of_reported_running() {
        let mut cache = FleetSnapshot::default();
        let mut seeded = instance("db-1", InstanceStatus::Running, false);
        seeded.uptime_hour = 12.5;
        cache.upsert_instance(seeded);
        let live = live_with(vec![instance("db-1", InstanceStatus::Running, false)]);
        let outcome = reconcile(&mut cache, &live, params());
        assert_eq!(outcome.stop_requests, vec![("us-a".to_string(), "db-1".to_string())]);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn termination_counts_and_rotates_flag() {
        let mut cache = FleetSnapshot::default();
        cache.upsert_instance(instance("web-1", InstanceStatus::Running, true));
        let live = live_with(vec![instance("web-1", InstanceStatus::Terminated, true)]);
        let outcome = reconcile(&mut cache, &live, params());
        assert_eq!(outcome.events[0].kind(), "terminated");
        // The event carries the pre-rotation flag; the cache the next one.
        assert_eq!(outcome.events[0].instance().flag, InstanceFlag::New);
        assert_eq!(cache.instance("web-1").unwrap().flag, InstanceFlag::Recycled);
        assert_eq!(cache.zone("us-a").unwrap().total_termination_count, 1);

        // A second termination after recycling rotates back to New.
        cache
            .instance("web-1")
            .cloned()
            .map(|mut i| {
                i.status = InstanceStatus::Running;
                cache.upsert_instance(i)
            })
            .unwrap();
        let outcome = reconcile(&mut cache, &live, params());
        assert_eq!(outcome.events[0].kind(), "terminated");
        assert_eq!(cache.instance("web-1").unwrap().flag, InstanceFlag::New);
    }

    #[test]
    fn matured_termination_is_not_counted() {
        let mut cache = FleetSnapshot::default();
        let mut seeded = instance("web-1", InstanceStatus::Running, true);
        seeded.flag = InstanceFlag::Matured;
        cache.upsert_instance(seeded);
        let live = live_with(vec![instance("web-1", InstanceStatus::Terminated, true)]);
        let outcome = reconcile(&mut cache, &live, params());
        assert_eq!(outcome.events[0].kind(), "terminated");
        assert!(cache.zone("us-a").map_or(true, |z| z.total_termination_count == 0));
        // Matured preemptible flags reset to New for the next life.
        assert_eq!(cache.instance("web-1").unwrap().flag, InstanceFlag::New);
    }

    #[test]
    fn stopping_after_running_counts_as_terminated() {
        let mut cache = FleetSnapshot::default();
        cache.upsert_instance(instance("web-1", InstanceStatus::Running, true));
        let live = live_with(vec![instance("web-1", InstanceStatus::Stopping, true)]);
        let outcome = reconcile(&mut cache, &live, params());
        assert_eq!(outcome.events[0].kind(), "terminated");
        assert_eq!(cache.zone("us-a").unwrap().total_termination_count, 1);
    }

    #[test]
    fn already_terminated_instance_is_quiet() {
        let mut cache = FleetSnapshot::default();
        cache.upsert_instance(instance("web-1", InstanceStatus::Terminated, true));
        let live = live_with(vec![instance("web-1", InstanceStatus::Terminated, true)]);
        let outcome = reconcile(&mut cache, &live, params());
        assert!(outcome.events.is_empty());
    }
}
