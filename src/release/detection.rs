//! Release-Detection Resolver
//!
//! Produces the `{name, version, path}` list the publish run works on, from
//! pre-detected input when the caller has it and from changeset status
//! otherwise.

use crate::core::error::PublishError;
use crate::core::package_manager::PackageManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A package to publish, identified by name and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreDetectedRelease {
    pub name: String,
    pub version: String,
    /// Package root; looked up in the workspace when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpType {
    Major,
    Minor,
    Patch,
    None,
}

/// One entry of `releases` in changeset status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetRelease {
    pub name: String,
    pub new_version: String,
    #[serde(rename = "type")]
    pub bump: BumpType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetEntryRelease {
    pub name: String,
    #[serde(rename = "type")]
    pub bump: BumpType,
}

/// One pending changeset file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub releases: Vec<ChangesetEntryRelease>,
}

/// Parsed `changeset status --output` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetStatus {
    #[serde(default)]
    pub releases: Vec<ChangesetRelease>,
    #[serde(default)]
    pub changesets: Vec<ChangesetEntry>,
}

/// Source of pending release information
#[async_trait]
pub trait ChangesetSource: Send + Sync {
    async fn status(
        &self,
        package_manager: PackageManager,
        target_branch: &str,
    ) -> Result<ChangesetStatus, PublishError>;
}

pub struct ReleaseDetector<'a> {
    source: &'a dyn ChangesetSource,
    package_manager: PackageManager,
    target_branch: String,
}

impl<'a> ReleaseDetector<'a> {
    pub fn new(
        source: &'a dyn ChangesetSource,
        package_manager: PackageManager,
        target_branch: impl Into<String>,
    ) -> Self {
        Self {
            source,
            package_manager,
            target_branch: target_branch.into(),
        }
    }

    /// Pre-detected releases win; changeset status is the fallback
    pub async fn resolve(
        &self,
        pre_detected: &[PreDetectedRelease],
    ) -> Result<Vec<PreDetectedRelease>, PublishError> {
        if !pre_detected.is_empty() {
            tracing::info!(count = pre_detected.len(), "using pre-detected releases");
            return Ok(pre_detected.to_vec());
        }

        let status = self
            .source
            .status(self.package_manager, &self.target_branch)
            .await?;

        let releases: Vec<PreDetectedRelease> = status
            .releases
            .into_iter()
            .filter(|r| r.bump != BumpType::None)
            .map(|r| PreDetectedRelease {
                name: r.name,
                version: r.new_version,
                path: None,
            })
            .collect();

        tracing::info!(count = releases.len(), "releases from changeset status");
        Ok(releases)
    }
}
