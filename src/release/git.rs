//! Git plumbing used by release detection
//!
//! Only the handful of read/checkout commands the pipeline needs, all run
//! through the [`CommandRunner`].

use crate::core::traits::CommandRunner;
use anyhow::{Context, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait GitOps: Send + Sync {
    /// Branch name, or the commit sha when HEAD is detached
    async fn current_ref(&self) -> anyhow::Result<String>;

    async fn rev_parse(&self, rev: &str) -> anyhow::Result<String>;

    async fn merge_base(&self, a: &str, b: &str) -> anyhow::Result<String>;

    async fn checkout(&self, rev: &str) -> anyhow::Result<()>;

    /// Paths changed between two commits, relative to the repository root
    async fn changed_files(&self, base: &str, head: &str) -> anyhow::Result<Vec<String>>;

    /// File content at a revision, `None` when it does not exist there
    async fn show_file(&self, rev: &str, path: &str) -> anyhow::Result<Option<String>>;
}

/// [`GitOps`] over the git CLI
pub struct CliGit {
    runner: Arc<dyn CommandRunner>,
    repo_root: PathBuf,
}

impl CliGit {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = self
            .runner
            .run("git", &args, Some(&self.repo_root))
            .await
            .with_context(|| format!("git {}", args.join(" ")))?;

        if !output.success() {
            bail!(
                "git {} exited with code {}: {}",
                args.join(" "),
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl GitOps for CliGit {
    async fn current_ref(&self) -> anyhow::Result<String> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if branch == "HEAD" {
            self.git(&["rev-parse", "HEAD"]).await
        } else {
            Ok(branch)
        }
    }

    async fn rev_parse(&self, rev: &str) -> anyhow::Result<String> {
        self.git(&["rev-parse", rev]).await
    }

    async fn merge_base(&self, a: &str, b: &str) -> anyhow::Result<String> {
        self.git(&["merge-base", a, b]).await
    }

    async fn checkout(&self, rev: &str) -> anyhow::Result<()> {
        self.git(&["checkout", rev]).await.map(|_| ())
    }

    async fn changed_files(&self, base: &str, head: &str) -> anyhow::Result<Vec<String>> {
        let output = self.git(&["diff", "--name-only", base, head]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn show_file(&self, rev: &str, path: &str) -> anyhow::Result<Option<String>> {
        let spec = format!("{}:{}", rev, path);
        let args = vec!["show".to_string(), spec];
        let output = self.runner.run("git", &args, Some(&self.repo_root)).await?;

        if output.success() {
            Ok(Some(output.stdout))
        } else if output.stderr.contains("does not exist") || output.stderr.contains("exists on disk, but not in") {
            Ok(None)
        } else {
            bail!("git show {}:{} failed: {}", rev, path, output.stderr.trim())
        }
    }
}
