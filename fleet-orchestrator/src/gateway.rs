use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::BoxFuture;

use fleet_providers::{ComputeProvider, InstanceRecord, Operation, OperationStatus};

const MAX_API_RETRY: usize = 2;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Retry wrapper around the compute provider. Every call is attempted a
/// bounded number of times; callers see `None` once the budget is spent and
/// decide what to do with the failure.
pub struct Gateway {
    provider: Arc<dyn ComputeProvider>,
    shutdown: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(provider: Arc<dyn ComputeProvider>, shutdown: Arc<AtomicBool>) -> Self {
        Self { provider, shutdown }
    }

    async fn call<'a, T>(
        &self,
        what: &str,
        f: impl Fn() -> BoxFuture<'a, Result<T>>,
    ) -> Option<T> {
        for attempt in 0..=MAX_API_RETRY {
            match f().await {
                Ok(value) => return Some(value),
                Err(e) if attempt < MAX_API_RETRY => {
                    tracing::warn!("{} failed: {:#}. Retrying...", what, e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!("{} failed after {} attempts: {:#}", what, attempt + 1, e);
                }
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
        }
        None
    }

    pub async fn list_instances(&self, zone: &str) -> Option<Vec<InstanceRecord>> {
        self.call(&format!("listing instances in {}", zone), || {
            self.provider.list_instances(zone)
        })
        .await
    }

    pub async fn create_disk_from_snapshot(&self, zone: &str, disk_name: &str) -> Option<Operation> {
        self.call(&format!("creating disk {} in {}", disk_name, zone), || {
            self.provider.create_disk_from_snapshot(zone, disk_name)
        })
        .await
    }

    pub async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        disk_name: &str,
        preemptible: bool,
    ) -> Option<Operation> {
        self.call(&format!("creating instance {} in {}", name, zone), || {
            self.provider.create_instance(zone, name, disk_name, preemptible)
        })
        .await
    }

    pub async fn delete_instance(&self, zone: &str, name: &str) -> Option<Operation> {
        self.call(&format!("deleting instance {} in {}", name, zone), || {
            self.provider.delete_instance(zone, name)
        })
        .await
    }

    pub async fn start_instance(&self, zone: &str, name: &str) -> Option<Operation> {
        self.call(&format!("starting instance {} in {}", name, zone), || {
            self.provider.start_instance(zone, name)
        })
        .await
    }

    pub async fn stop_instance(&self, zone: &str, name: &str) -> Option<Operation> {
        self.call(&format!("stopping instance {} in {}", name, zone), || {
            self.provider.stop_instance(zone, name)
        })
        .await
    }

    /// Poll an operation until the provider reports it done. Returns `None`
    /// when a poll exhausts its retries or shutdown is requested first.
    pub async fn wait_for_operation(&self, operation: &Operation) -> Option<OperationStatus> {
        loop {
            let current = self
                .call(&format!("polling operation {}", operation.name), || {
                    self.provider.get_operation(&operation.zone, &operation.name)
                })
                .await?;
            if current.status.is_done() {
                return Some(current.status);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
        }
    }
}
