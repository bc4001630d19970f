use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod events;

// --- Enums ---

/// Provider-reported lifecycle status of a compute instance.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Terminated,
}

impl InstanceStatus {
    /// Parse the status string the provider API reports.
    pub fn from_api(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "PROVISIONING" => Ok(InstanceStatus::Provisioning),
            "STAGING" => Ok(InstanceStatus::Staging),
            "RUNNING" => Ok(InstanceStatus::Running),
            "STOPPING" => Ok(InstanceStatus::Stopping),
            "TERMINATED" => Ok(InstanceStatus::Terminated),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown instance status '{0}'")]
pub struct UnknownStatus(pub String);

/// Recycling flag driving the termination-recovery decision.
///
/// Preemptible instances alternate New -> Recycled -> New across
/// terminations; maturity latches the flag to Matured exactly once while it
/// is still New. Non-preemptible instances always reset to New.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceFlag {
    #[default]
    New,
    Matured,
    Recycled,
}

// --- Entities ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub ip: Option<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub preemptible: bool,
    pub status: InstanceStatus,
    pub flag: InstanceFlag,
    /// Accumulated hours while Running since the last (re)start. Carried
    /// from the cached copy onto the live copy on every poll.
    pub uptime_hour: f64,
}

impl Instance {
    /// Short label used in operator-facing messages.
    pub fn kind_label(&self) -> &'static str {
        if self.preemptible {
            "PE"
        } else {
            "NPE"
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Zone {
    pub name: String,
    /// Uptime accumulated by preemptible instances in this zone.
    pub preemptible_uptime_hour: f64,
    /// Uptime accumulated by non-preemptible instances in this zone.
    pub non_preemptible_uptime_hour: f64,
    /// Terminations that happened before the instance matured.
    pub total_termination_count: u64,
    /// Planning-signal instance count, adjusted eagerly during relocation.
    pub instance_count: i64,
}

impl Zone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preemptible_uptime_hour: 0.0,
            non_preemptible_uptime_hour: 0.0,
            total_termination_count: 0,
            instance_count: 0,
        }
    }

    pub fn total_uptime_hour(&self) -> f64 {
        self.preemptible_uptime_hour + self.non_preemptible_uptime_hour
    }

    /// Premature terminations per running-hour; 0 while no uptime recorded.
    pub fn termination_rate(&self) -> f64 {
        let uptime = self.total_uptime_hour();
        if uptime > 0.0 {
            self.total_termination_count as f64 / uptime
        } else {
            0.0
        }
    }
}

/// One consistent view of the fleet: zones and instances keyed by name.
///
/// The cached snapshot is long-lived and mutated only through these methods;
/// the live snapshot is rebuilt wholesale on every poll and never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FleetSnapshot {
    zones: BTreeMap<String, Zone>,
    instances: BTreeMap<String, Instance>,
}

impl FleetSnapshot {
    pub fn from_instances(instances: Vec<Instance>) -> Self {
        let mut snapshot = Self::default();
        for instance in instances {
            snapshot
                .zones
                .entry(instance.zone.clone())
                .or_insert_with(|| Zone::new(instance.zone.clone()));
            snapshot.instances.insert(instance.name.clone(), instance);
        }
        snapshot
    }

    pub fn has_zone(&self, name: &str) -> bool {
        self.zones.contains_key(name)
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.get(name)
    }

    pub fn zone_mut(&mut self, name: &str) -> Option<&mut Zone> {
        self.zones.get_mut(name)
    }

    /// Fetch the zone, creating a zero-valued entry for a newly configured
    /// zone name.
    pub fn zone_or_default(&mut self, name: &str) -> &mut Zone {
        self.zones
            .entry(name.to_string())
            .or_insert_with(|| Zone::new(name))
    }

    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.name.clone(), zone);
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn upsert_instance(&mut self, instance: Instance) {
        self.instances.insert(instance.name.clone(), instance);
    }

    pub fn remove_instance(&mut self, name: &str) -> Option<Instance> {
        self.instances.remove(name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    /// Instance count per zone computed from this snapshot's instance set.
    pub fn instance_count_in(&self, zone: &str) -> usize {
        self.instances.values().filter(|i| i.zone == zone).count()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
