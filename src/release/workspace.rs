//! Workspace package discovery
//!
//! Maps package names to their directories from the root manifest's
//! `workspaces` field and `pnpm-workspace.yaml`.

use crate::targets::manifest::{PackageManifest, read_manifest};
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PNPM_WORKSPACE_FILE: &str = "pnpm-workspace.yaml";

#[derive(Debug, Default, Deserialize)]
struct PnpmWorkspace {
    #[serde(default)]
    packages: Vec<String>,
}

/// Name to directory map of every package in a repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspacePackages {
    packages: BTreeMap<String, PathBuf>,
}

impl WorkspacePackages {
    pub async fn discover(root: &Path) -> anyhow::Result<Self> {
        let mut patterns = Vec::new();

        let root_manifest = match tokio::fs::read_to_string(root.join("package.json")).await {
            Ok(content) => Some(
                serde_json::from_str::<PackageManifest>(&content)
                    .with_context(|| format!("invalid {}", root.join("package.json").display()))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(workspaces) = root_manifest.as_ref().and_then(|m| m.workspaces.as_ref()) {
            patterns.extend(workspaces.patterns().iter().cloned());
        }

        let pnpm_path = root.join(PNPM_WORKSPACE_FILE);
        match tokio::fs::read_to_string(&pnpm_path).await {
            Ok(content) => {
                let workspace: PnpmWorkspace = serde_yaml::from_str(&content)
                    .with_context(|| format!("invalid {}", pnpm_path.display()))?;
                patterns.extend(workspace.packages);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let (excluded, included): (Vec<String>, Vec<String>) =
            patterns.into_iter().partition(|p| p.starts_with('!'));
        let excluded: Vec<PathBuf> = excluded
            .iter()
            .map(|p| root.join(p.trim_start_matches('!').trim_end_matches('/')))
            .collect();

        let mut directories = Vec::new();
        for pattern in &included {
            directories.extend(expand_pattern(root, pattern).await?);
        }

        let mut packages = BTreeMap::new();
        if let Some(name) = root_manifest.and_then(|m| m.name) {
            packages.insert(name, root.to_path_buf());
        }

        for directory in directories {
            if excluded.iter().any(|e| directory == *e) {
                continue;
            }
            match read_manifest(&directory).await {
                Ok(manifest) => {
                    if let Some(name) = manifest.name {
                        packages.entry(name).or_insert(directory);
                    }
                }
                Err(e) => tracing::debug!(directory = %directory.display(), error = %e, "skipping workspace entry"),
            }
        }

        tracing::debug!(count = packages.len(), "discovered workspace packages");
        Ok(Self { packages })
    }

    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.packages.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.packages.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }
}

/// Expand `dir`, `dir/*` and `dir/**` relative to `root`
async fn expand_pattern(root: &Path, pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let pattern = pattern.trim_start_matches("./").trim_end_matches('/');

    if let Some(prefix) = pattern.strip_suffix("/**") {
        return subdirectories(&root.join(prefix), true).await;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return subdirectories(&root.join(prefix), false).await;
    }
    if pattern.contains('*') {
        tracing::warn!(pattern, "unsupported workspace glob, ignoring");
        return Ok(Vec::new());
    }

    let directory = root.join(pattern);
    Ok(if directory.is_dir() { vec![directory] } else { Vec::new() })
}

async fn subdirectories(parent: &Path, recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![parent.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            if path.file_name().is_some_and(|n| n == "node_modules") {
                continue;
            }
            if recursive {
                pending.push(path.clone());
            }
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_discovers_npm_workspaces() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "package.json", r#"{"name": "monorepo", "private": true, "workspaces": ["packages/*", "!packages/skip"]}"#);
        write(root, "packages/a/package.json", r#"{"name": "@acme/a", "version": "1.0.0"}"#);
        write(root, "packages/b/package.json", r#"{"name": "@acme/b", "version": "1.0.0"}"#);
        write(root, "packages/skip/package.json", r#"{"name": "@acme/skip", "version": "1.0.0"}"#);
        std::fs::create_dir_all(root.join("packages/empty")).unwrap();

        let workspace = WorkspacePackages::discover(root).await.unwrap();

        assert_eq!(workspace.path_of("@acme/a"), Some(root.join("packages/a").as_path()));
        assert_eq!(workspace.path_of("@acme/b"), Some(root.join("packages/b").as_path()));
        assert_eq!(workspace.path_of("monorepo"), Some(root));
        assert!(workspace.path_of("@acme/skip").is_none());
        assert_eq!(workspace.len(), 3);
    }

    #[tokio::test]
    async fn test_discovers_pnpm_workspace_recursively() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "pnpm-workspace.yaml", "packages:\n  - 'libs/**'\n  - tools\n");
        write(root, "libs/group/inner/package.json", r#"{"name": "inner"}"#);
        write(root, "tools/package.json", r#"{"name": "tools"}"#);
        write(root, "libs/group/node_modules/dep/package.json", r#"{"name": "dep"}"#);

        let workspace = WorkspacePackages::discover(root).await.unwrap();

        assert_eq!(workspace.path_of("inner"), Some(root.join("libs/group/inner").as_path()));
        assert_eq!(workspace.path_of("tools"), Some(root.join("tools").as_path()));
        assert!(workspace.path_of("dep").is_none());
    }

    #[tokio::test]
    async fn test_yarn_object_form_and_missing_root() {
        let temp = TempDir::new().unwrap();
        assert!(WorkspacePackages::discover(temp.path()).await.unwrap().is_empty());

        write(temp.path(), "package.json", r#"{"private": true, "workspaces": {"packages": ["pkg"]}}"#);
        write(temp.path(), "pkg/package.json", r#"{"name": "pkg"}"#);

        let workspace = WorkspacePackages::discover(temp.path()).await.unwrap();
        assert_eq!(workspace.iter().map(|(name, _)| name).collect::<Vec<_>>(), vec!["pkg"]);
    }
}
