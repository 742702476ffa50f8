//! Read-only collaborators the engine fetches from each cycle: the policy
//! data service and the device-local usage/package source. Both are traits so
//! the manager can be driven against in-memory fakes in tests and against
//! file-backed stores in the daemon binary.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use guardian_common::{AccessOverride, Error, PolicySnapshot, Result, UsageSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Policy rows for one child, guardian-maintained.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn fetch_policy(&self, child: Uuid) -> Result<PolicySnapshot>;

    /// Overrides that are `Active` and unexpired at `now`.
    async fn fetch_active_overrides(
        &self,
        child: Uuid,
        now: DateTime<Local>,
    ) -> Result<Vec<AccessOverride>>;
}

/// Device-local measurement source. Snapshots are "as of now", never
/// historical aggregates.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage_snapshot(&self) -> Result<UsageSnapshot>;
    async fn fetch_installed_packages(&self) -> Result<Vec<String>>;
}

/// On-disk layout of the policy file consumed by [`FilePolicyStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(flatten)]
    pub policy: PolicySnapshot,
    #[serde(default)]
    pub overrides: Vec<AccessOverride>,
}

/// TOML-file-backed policy store used by the daemon binary. Re-read on every
/// fetch so guardian edits take effect on the next evaluation cycle.
pub struct FilePolicyStore {
    path: PathBuf,
}

impl FilePolicyStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read(&self) -> Result<PolicyFile> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::data_fetch("policy", e))?;
        toml::from_str(&raw).map_err(|e| Error::data_fetch("policy", e))
    }
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn fetch_policy(&self, child: Uuid) -> Result<PolicySnapshot> {
        debug!(%child, path = %self.path.display(), "loading policy file");
        Ok(self.read().await?.policy)
    }

    async fn fetch_active_overrides(
        &self,
        _child: Uuid,
        now: DateTime<Local>,
    ) -> Result<Vec<AccessOverride>> {
        let file = self.read().await?;
        Ok(file.overrides.into_iter().filter(|o| o.is_active(now)).collect())
    }
}

/// JSON-file-backed usage source for the daemon binary: a package -> seconds
/// map and a flat installed-package list, refreshed by whatever measures
/// usage on the device.
pub struct FileUsageSource {
    usage_path: PathBuf,
    packages_path: PathBuf,
}

impl FileUsageSource {
    pub fn new(usage_path: PathBuf, packages_path: PathBuf) -> Self {
        Self { usage_path, packages_path }
    }
}

#[async_trait]
impl UsageSource for FileUsageSource {
    async fn fetch_usage_snapshot(&self) -> Result<UsageSnapshot> {
        let raw = tokio::fs::read_to_string(&self.usage_path)
            .await
            .map_err(|e| Error::data_fetch("usage", e))?;
        serde_json::from_str(&raw).map_err(|e| Error::data_fetch("usage", e))
    }

    async fn fetch_installed_packages(&self) -> Result<Vec<String>> {
        let raw = tokio::fs::read_to_string(&self.packages_path)
            .await
            .map_err(|e| Error::data_fetch("packages", e))?;
        serde_json::from_str(&raw).map_err(|e| Error::data_fetch("packages", e))
    }
}
