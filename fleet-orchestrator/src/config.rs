use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Runtime configuration, loaded from the YAML file given as the single
/// process argument.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project_id: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
    pub snapshot_source: String,
    pub machine_type: String,
    #[serde(default = "default_disk_type")]
    pub disk_type: String,
    pub zones: Vec<String>,
    pub min_instance_count: usize,
    pub min_zone_spread: usize,
    /// Hours a non-preemptible instance must stay alive before a stop is
    /// considered; also the basis of the termination-rate threshold.
    pub non_preemptible_min_alive_hours: f64,
    /// Fraction of configured zones that may be unstable before overall
    /// preemptible supply is considered low.
    pub high_demand_zone_fraction: f64,
    #[serde(default = "default_maturity_hours")]
    pub maturity_hours: f64,
    #[serde(default)]
    pub excluded_instances: Vec<String>,
    /// Only instances whose name starts with one of these prefixes are
    /// managed; an empty list manages everything the zones report.
    #[serde(default)]
    pub instance_name_prefixes: Vec<String>,
    #[serde(default)]
    pub instance_tags: Vec<String>,
    #[serde(default)]
    pub email_recipients: Vec<String>,
    #[serde(default)]
    pub chat_webhook_url: Option<String>,
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_engine_interval_secs")]
    pub engine_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gce,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
}

fn default_disk_type() -> String {
    "pd-standard".to_string()
}

fn default_maturity_hours() -> f64 {
    23.0
}

fn default_smtp_port() -> u16 {
    465
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_engine_interval_secs() -> u64 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("minimum instance count must be greater or equal to the minimum number of zone(s) to be spread evenly")]
    InstanceCountBelowZoneSpread,
    #[error("configured zone count must be greater or equal to the minimum number of zone(s) to be spread evenly")]
    TooFewZones,
    #[error("non_preemptible_min_alive_hours must be greater than zero")]
    NonPositiveMinAliveHours,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_instance_count < self.min_zone_spread {
            return Err(ConfigError::InstanceCountBelowZoneSpread);
        }
        if self.zones.len() < self.min_zone_spread {
            return Err(ConfigError::TooFewZones);
        }
        if self.non_preemptible_min_alive_hours <= 0.0 {
            return Err(ConfigError::NonPositiveMinAliveHours);
        }
        Ok(())
    }

    /// A zone whose termination rate exceeds this is in low preemptible
    /// supply. Derived once from configuration, not per call.
    pub fn termination_rate_threshold(&self) -> f64 {
        1.0 / self.non_preemptible_min_alive_hours
    }

    /// Zone count above which overall preemptible supply counts as low.
    pub fn unstable_zone_threshold(&self) -> f64 {
        self.zones.len() as f64 * self.high_demand_zone_fraction
    }

    /// One engine tick expressed in hours.
    pub fn tick_hours(&self) -> f64 {
        self.engine_interval_secs as f64 / 3600.0
    }

    /// Resolve the provider API token, preferring the token file.
    pub fn resolve_access_token(&self) -> Option<String> {
        if let Some(path) = &self.access_token_file {
            if let Ok(token) = std::fs::read_to_string(path) {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Key/value rows for the config summary table; secrets are masked.
    pub fn summary_rows(&self) -> Vec<(String, String)> {
        fn mask(value: &str) -> String {
            "*".repeat(value.len())
        }
        let mut rows = vec![
            ("project_id".to_string(), self.project_id.clone()),
            ("snapshot_source".to_string(), self.snapshot_source.clone()),
            ("machine_type".to_string(), self.machine_type.clone()),
            ("disk_type".to_string(), self.disk_type.clone()),
            ("zones".to_string(), self.zones.join(" ")),
            (
                "min_instance_count".to_string(),
                self.min_instance_count.to_string(),
            ),
            (
                "min_zone_spread".to_string(),
                self.min_zone_spread.to_string(),
            ),
            (
                "non_preemptible_min_alive_hours".to_string(),
                self.non_preemptible_min_alive_hours.to_string(),
            ),
            (
                "high_demand_zone_fraction".to_string(),
                self.high_demand_zone_fraction.to_string(),
            ),
            ("maturity_hours".to_string(), self.maturity_hours.to_string()),
            (
                "excluded_instances".to_string(),
                self.excluded_instances.join(" "),
            ),
            (
                "instance_name_prefixes".to_string(),
                self.instance_name_prefixes.join(" "),
            ),
            (
                "email_recipients".to_string(),
                self.email_recipients.join(" "),
            ),
        ];
        if let Some(token) = &self.access_token {
            rows.push(("access_token".to_string(), mask(token)));
        }
        if let Some(url) = &self.chat_webhook_url {
            rows.push(("chat_webhook_url".to_string(), mask(url)));
        }
        rows
    }
}

#[cfg(test)]
pub(crate) use tests::base_config;
