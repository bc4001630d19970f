use anyhow::Result;
use async_trait::async_trait;

use fleet_common::InstanceStatus;

pub mod gce;
pub mod mock;

/// One raw instance row as reported by a provider list call. Conversion into
/// the fleet model (flag, uptime carry-over) happens in the orchestrator.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub ip: Option<String>,
    pub creation_timestamp: Option<String>,
    pub preemptible: bool,
    pub status: InstanceStatus,
}

/// Handle for a long-running provider operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub zone: String,
    pub status: OperationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

impl OperationStatus {
    pub fn from_api(s: &str) -> Self {
        match s {
            "DONE" => OperationStatus::Done,
            "RUNNING" => OperationStatus::Running,
            _ => OperationStatus::Pending,
        }
    }

    pub fn is_done(self) -> bool {
        self == OperationStatus::Done
    }
}

/// Cloud provider boundary. Every method maps to one remote API call; retry
/// and operation-completion polling live in the orchestrator's gateway.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn list_instances(&self, zone: &str) -> Result<Vec<InstanceRecord>>;

    async fn create_disk_from_snapshot(&self, zone: &str, disk_name: &str) -> Result<Operation>;

    /// Create an instance booting from `disk_name`. The zone and the
    /// preemptible option are fixed for the lifetime of the instance.
    async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        disk_name: &str,
        preemptible: bool,
    ) -> Result<Operation>;

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Operation>;

    async fn start_instance(&self, zone: &str, name: &str) -> Result<Operation>;

    async fn stop_instance(&self, zone: &str, name: &str) -> Result<Operation>;

    /// Fetch the current state of a previously returned operation.
    async fn get_operation(&self, zone: &str, operation_name: &str) -> Result<Operation>;
}
