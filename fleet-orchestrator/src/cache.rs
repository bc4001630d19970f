use std::path::PathBuf;

use anyhow::{Context, Result};

use fleet_common::FleetSnapshot;

/// Durable store for the cached fleet snapshot, keyed by project id.
///
/// Writes go to a temporary file in the same directory followed by a rename,
/// so a crash never leaves a half-written cache behind.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        let dir = dir
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        Self { dir }
    }

    fn cache_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!(".{}.fleet-cache.json", project_id))
    }

    /// Load the persisted snapshot; absent or unreadable caches yield `None`
    /// and the orchestrator starts from an empty view.
    pub fn load(&self, project_id: &str) -> Option<FleetSnapshot> {
        let path = self.cache_path(project_id);
        if !path.is_file() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!("discarding unreadable cache {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("cannot read cache {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, project_id: &str, snapshot: &FleetSnapshot) -> Result<()> {
        let path = self.cache_path(project_id);
        let tmp = self.dir.join(format!(".{}.fleet-cache.json.tmp", project_id));
        let raw = serde_json::to_vec(snapshot)?;
        std::fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}
