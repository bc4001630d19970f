use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use fleet_common::InstanceStatus;

use crate::{ComputeProvider, InstanceRecord, Operation, OperationStatus};

/// In-memory provider for tests and local bring-up. Operations complete
/// immediately; the call log lets tests assert the exact API sequence a
/// recovery issued (start vs delete+create).
#[derive(Default)]
pub struct MockProvider {
    instances: Mutex<BTreeMap<String, InstanceRecord>>,
    calls: Mutex<Vec<String>>,
    fail_zones: Mutex<Vec<String>>,
    fail_operations: Mutex<bool>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_instance(&self, record: InstanceRecord) {
        self.instances
            .lock()
            .unwrap()
            .insert(record.name.clone(), record);
    }

    pub fn set_status(&self, name: &str, status: InstanceStatus) {
        if let Some(record) = self.instances.lock().unwrap().get_mut(name) {
            record.status = status;
        }
    }

    /// Make every call against `zone` fail until cleared.
    pub fn fail_zone(&self, zone: &str) {
        self.fail_zones.lock().unwrap().push(zone.to_string());
    }

    /// Make every subsequent operation poll fail.
    pub fn fail_operation_polls(&self) {
        *self.fail_operations.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_zone(&self, zone: &str) -> Result<()> {
        if self.fail_zones.lock().unwrap().iter().any(|z| z == zone) {
            return Err(anyhow::anyhow!("mock provider: zone {} unavailable", zone));
        }
        Ok(())
    }

    fn done_operation(zone: &str) -> Operation {
        Operation {
            name: format!("mock-op-{}", Uuid::new_v4()),
            zone: zone.to_string(),
            status: OperationStatus::Done,
        }
    }
}

#[async_trait]
impl ComputeProvider for MockProvider {
    async fn list_instances(&self, zone: &str) -> Result<Vec<InstanceRecord>> {
        self.check_zone(zone)?;
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.zone == zone)
            .cloned()
            .collect())
    }

    async fn create_disk_from_snapshot(&self, zone: &str, disk_name: &str) -> Result<Operation> {
        self.check_zone(zone)?;
        self.record(format!("create_disk:{}:{}", zone, disk_name));
        Ok(Self::done_operation(zone))
    }

    async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        disk_name: &str,
        preemptible: bool,
    ) -> Result<Operation> {
        self.check_zone(zone)?;
        self.record(format!("create_instance:{}:{}", zone, name));
        let _ = disk_name;
        self.instances.lock().unwrap().insert(
            name.to_string(),
            InstanceRecord {
                name: name.to_string(),
                zone: zone.to_string(),
                machine_type: "mock-standard-1".to_string(),
                ip: Some("10.0.0.1".to_string()),
                creation_timestamp: None,
                preemptible,
                status: InstanceStatus::Running,
            },
        );
        Ok(Self::done_operation(zone))
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        self.check_zone(zone)?;
        self.record(format!("delete_instance:{}:{}", zone, name));
        self.instances.lock().unwrap().remove(name);
        Ok(Self::done_operation(zone))
    }

    async fn start_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        self.check_zone(zone)?;
        self.record(format!("start_instance:{}:{}", zone, name));
        self.set_status(name, InstanceStatus::Running);
        Ok(Self::done_operation(zone))
    }

    async fn stop_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        self.check_zone(zone)?;
        self.record(format!("stop_instance:{}:{}", zone, name));
        self.set_status(name, InstanceStatus::Terminated);
        Ok(Self::done_operation(zone))
    }

    async fn get_operation(&self, zone: &str, operation_name: &str) -> Result<Operation> {
        self.check_zone(zone)?;
        if *self.fail_operations.lock().unwrap() {
            return Err(anyhow::anyhow!(
                "mock provider: operation {} unavailable",
                operation_name
            ));
        }
        Ok(Operation {
            name: operation_name.to_string(),
            zone: zone.to_string(),
            status: OperationStatus::Done,
        })
    }
}
