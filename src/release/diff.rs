//! Release detection from a commit range
//!
//! Any non-private `package.json` whose version went up between two commits
//! is a release.

use crate::release::detection::PreDetectedRelease;
use crate::release::git::GitOps;
use crate::targets::PackageManifest;
use semver::Version;
use std::path::Path;

fn is_manifest_path(path: &str) -> bool {
    let path = Path::new(path);
    path.file_name().is_some_and(|name| name == "package.json")
        && !path.components().any(|c| c.as_os_str() == "node_modules")
}

fn parse_manifest(content: &str) -> Option<PackageManifest> {
    serde_json::from_str(content).ok()
}

fn version_increased(old: Option<&str>, new: &str) -> bool {
    let Ok(new) = Version::parse(new) else {
        return false;
    };
    match old.map(Version::parse) {
        None => true,
        Some(Ok(old)) => new > old,
        // A valid version replacing garbage is a release
        Some(Err(_)) => true,
    }
}

/// Releases introduced between `base` and `head`, with absolute paths
pub async fn detect_releases_from_diff(
    git: &dyn GitOps,
    repo_root: &Path,
    base: &str,
    head: &str,
) -> anyhow::Result<Vec<PreDetectedRelease>> {
    let mut releases = Vec::new();

    for file in git.changed_files(base, head).await? {
        if !is_manifest_path(&file) {
            continue;
        }

        let Some(current) = git.show_file(head, &file).await?.as_deref().and_then(parse_manifest) else {
            continue;
        };
        if current.private {
            continue;
        }
        let (Some(name), Some(version)) = (current.name.clone(), current.version.clone()) else {
            continue;
        };

        let previous = git
            .show_file(base, &file)
            .await?
            .as_deref()
            .and_then(parse_manifest)
            .and_then(|m| m.version);

        if !version_increased(previous.as_deref(), &version) {
            continue;
        }

        let directory = Path::new(&file).parent().unwrap_or(Path::new(""));
        tracing::info!(package = %name, %version, previous = ?previous, "version bump detected");
        releases.push(PreDetectedRelease {
            name,
            version,
            path: Some(repo_root.join(directory)),
        });
    }

    Ok(releases)
}
