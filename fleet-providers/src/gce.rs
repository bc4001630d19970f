use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use fleet_common::InstanceStatus;

use crate::{ComputeProvider, InstanceRecord, Operation, OperationStatus};

const API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Everything the GCE REST client needs to build request bodies.
#[derive(Debug, Clone)]
pub struct GceSettings {
    pub project_id: String,
    pub access_token: String,
    /// Source snapshot all recreated boot disks are cloned from,
    /// e.g. `global/snapshots/fleet-base`.
    pub snapshot_source: String,
    pub machine_type: String,
    pub disk_type: String,
    pub instance_tags: Vec<String>,
}

pub struct GceProvider {
    client: Client,
    settings: GceSettings,
}

impl GceProvider {
    pub fn new(settings: GceSettings) -> Result<Self> {
        // Without an overall timeout a stalled provider call can hang a
        // recovery task forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client, settings })
    }

    fn zone_url(&self, zone: &str, tail: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            API_BASE, self.settings.project_id, zone, tail
        )
    }

    async fn post_json(&self, url: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.settings.access_token)
            .json(&body)
            .send()
            .await?;
        Self::into_json(resp).await
    }

    async fn into_json(resp: reqwest::Response) -> Result<Value> {
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("provider call failed: {} - {}", status, text));
        }
        Ok(resp.json().await?)
    }

    fn parse_operation(zone: &str, value: &Value) -> Result<Operation> {
        let name = value["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("operation response missing name: {}", value))?;
        let status = OperationStatus::from_api(value["status"].as_str().unwrap_or(""));
        Ok(Operation {
            name: name.to_string(),
            zone: zone.to_string(),
            status,
        })
    }

    fn parse_instance(item: &Value) -> Option<InstanceRecord> {
        let name = item["name"].as_str()?.to_string();
        let status_str = item["status"].as_str().unwrap_or("");
        let status = match InstanceStatus::from_api(status_str) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("skipping instance {}: {}", name, e);
                return None;
            }
        };
        // machineType and zone come back as full resource URLs.
        let machine_type = item["machineType"]
            .as_str()
            .and_then(|s| s.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        let zone = item["zone"]
            .as_str()
            .and_then(|s| s.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        let ip = item["networkInterfaces"][0]["networkIP"]
            .as_str()
            .map(|s| s.to_string());
        Some(InstanceRecord {
            name,
            zone,
            machine_type,
            ip,
            creation_timestamp: item["creationTimestamp"].as_str().map(|s| s.to_string()),
            preemptible: item["scheduling"]["preemptible"].as_bool().unwrap_or(false),
            status,
        })
    }
}

#[async_trait]
impl ComputeProvider for GceProvider {
    async fn list_instances(&self, zone: &str) -> Result<Vec<InstanceRecord>> {
        let url = self.zone_url(zone, "instances");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.access_token)
            .send()
            .await?;
        let body = Self::into_json(resp).await?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(Self::parse_instance).collect())
    }

    async fn create_disk_from_snapshot(&self, zone: &str, disk_name: &str) -> Result<Operation> {
        let url = self.zone_url(zone, "disks");
        let body = json!({
            "name": disk_name,
            "sourceSnapshot": self.settings.snapshot_source,
            "type": format!(
                "projects/{}/zones/{}/diskTypes/{}",
                self.settings.project_id, zone, self.settings.disk_type
            ),
        });
        let resp = self.post_json(&url, body).await?;
        Self::parse_operation(zone, &resp)
    }

    async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        disk_name: &str,
        preemptible: bool,
    ) -> Result<Operation> {
        let url = self.zone_url(zone, "instances");
        let project = &self.settings.project_id;
        let body = json!({
            "name": name,
            "machineType": format!(
                "projects/{}/zones/{}/machineTypes/{}",
                project, zone, self.settings.machine_type
            ),
            "tags": { "items": self.settings.instance_tags },
            "disks": [{
                "type": "PERSISTENT",
                "boot": true,
                "mode": "READ_WRITE",
                "autoDelete": true,
                "deviceName": disk_name,
                "source": format!("projects/{}/zones/{}/disks/{}", project, zone, disk_name),
            }],
            "canIpForward": false,
            "networkInterfaces": [{
                "network": format!("projects/{}/global/networks/default", project),
            }],
            "scheduling": {
                "preemptible": preemptible,
                // Preemptible instances cannot live-migrate or auto-restart.
                "onHostMaintenance": if preemptible { "TERMINATE" } else { "MIGRATE" },
                "automaticRestart": !preemptible,
            },
            "metadata": {
                "items": [{ "key": "fqdn", "value": name }],
            },
        });
        let resp = self.post_json(&url, body).await?;
        Self::parse_operation(zone, &resp)
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        let url = self.zone_url(zone, &format!("instances/{}", name));
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.settings.access_token)
            .send()
            .await?;
        let body = Self::into_json(resp).await?;
        Self::parse_operation(zone, &body)
    }

    async fn start_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        let url = self.zone_url(zone, &format!("instances/{}/start", name));
        let resp = self.post_json(&url, json!({})).await?;
        Self::parse_operation(zone, &resp)
    }

    async fn stop_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        let url = self.zone_url(zone, &format!("instances/{}/stop", name));
        let resp = self.post_json(&url, json!({})).await?;
        Self::parse_operation(zone, &resp)
    }

    async fn get_operation(&self, zone: &str, operation_name: &str) -> Result<Operation> {
        let url = self.zone_url(zone, &format!("operations/{}", operation_name));
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.access_token)
            .send()
            .await?;
        let body = Self::into_json(resp).await?;
        Self::parse_operation(zone, &body)
    }
}
