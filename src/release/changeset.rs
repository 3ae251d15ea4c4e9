//! Changeset status reader
//!
//! Runs `changeset status --output` and parses the result. On the release
//! branch the changesets have already been consumed into version bumps, so
//! an empty result triggers a second read at the merge base with the target
//! branch.

use crate::core::error::PublishError;
use crate::core::package_manager::{Operation, PackageManager};
use crate::core::traits::CommandRunner;
use crate::release::detection::{ChangesetSource, ChangesetStatus};
use crate::release::git::GitOps;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ChangesetStatusReader {
    runner: Arc<dyn CommandRunner>,
    git: Arc<dyn GitOps>,
    repo_root: PathBuf,
}

fn detection_error(message: impl Into<String>) -> PublishError {
    PublishError::ReleaseDetectionFailed {
        message: message.into(),
    }
}

impl ChangesetStatusReader {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        git: Arc<dyn GitOps>,
        repo_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            git,
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// One `changeset status` run against the current checkout
    async fn read_status(&self, package_manager: PackageManager) -> Result<ChangesetStatus, PublishError> {
        let output_file = tempfile::Builder::new()
            .prefix("changeset-status-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| detection_error(format!("cannot create status file: {}", e)))?;
        let output_path = output_file.path().to_path_buf();

        let spec = package_manager.command(Operation::Exec).with_args([
            "changeset".to_string(),
            "status".to_string(),
            "--output".to_string(),
            output_path.display().to_string(),
        ]);

        let output = self
            .runner
            .run(spec.program, &spec.args, Some(&self.repo_root))
            .await
            .map_err(|e| detection_error(e.to_string()))?;

        let content = tokio::fs::read_to_string(&output_path)
            .await
            .unwrap_or_default();

        // changeset status exits non-zero for some states yet still writes the file
        if content.trim().is_empty() {
            if output.success() {
                return Ok(ChangesetStatus::default());
            }
            return Err(detection_error(format!(
                "changeset status exited with code {}: {}",
                output.exit_code,
                output.combined().trim()
            )));
        }

        serde_json::from_str(&content)
            .map_err(|e| detection_error(format!("invalid changeset status output: {}", e)))
    }

    async fn read_at_merge_base(
        &self,
        package_manager: PackageManager,
        target_branch: &str,
    ) -> Result<ChangesetStatus, PublishError> {
        let original = self
            .git
            .current_ref()
            .await
            .map_err(|e| detection_error(e.to_string()))?;
        let head = self
            .git
            .rev_parse("HEAD")
            .await
            .map_err(|e| detection_error(e.to_string()))?;
        let base = self
            .git
            .merge_base("HEAD", &format!("origin/{}", target_branch))
            .await
            .map_err(|e| detection_error(e.to_string()))?;

        if base == head {
            tracing::debug!(%base, "merge base is HEAD, no earlier changesets to read");
            return Ok(ChangesetStatus::default());
        }

        tracing::info!(%base, "reading changeset status at merge base");
        self.git
            .checkout(&base)
            .await
            .map_err(|e| detection_error(e.to_string()))?;

        let status = self.read_status(package_manager).await;
        self.restore(&original).await;
        status
    }

    async fn restore(&self, original: &str) {
        if let Err(e) = self.git.checkout(original).await {
            tracing::warn!(error = %e, original, "failed to restore checkout, trying previous ref");
            if let Err(e) = self.git.checkout("-").await {
                tracing::error!(error = %e, "could not restore original checkout");
            }
        }
    }
}

#[async_trait]
impl ChangesetSource for ChangesetStatusReader {
    async fn status(
        &self,
        package_manager: PackageManager,
        target_branch: &str,
    ) -> Result<ChangesetStatus, PublishError> {
        let status = self.read_status(package_manager).await?;
        if !status.releases.is_empty() {
            return Ok(status);
        }
        self.read_at_merge_base(package_manager, target_branch).await
    }
}
