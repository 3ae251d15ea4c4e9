//! Packing engine
//!
//! Tarballs are packed into a scratch directory owned by the [`Packer`], so
//! no archive ever lands inside a package directory where a later pack would
//! pick it up. Every failure here is soft: it is logged and reported as
//! `None`, and only the targets of that directory fail.

use crate::core::package_manager::{Operation, PackageManager};
use crate::core::traits::CommandRunner;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

/// A tarball packed once and shared by every target of its directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrePackedTarball {
    pub path: PathBuf,
    /// `sha256:<hex>` over the tarball bytes
    pub digest: String,
    pub filename: String,
    /// SHA-1 reported by the pack tool, comparable with `dist.shasum`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
}

/// One entry of `pack --json` output
///
/// npm prints a list of these, pnpm a single object.
#[derive(Debug, Clone, Deserialize)]
struct PackEntry {
    filename: String,
    #[serde(default)]
    shasum: Option<String>,
}

/// Stream a file through SHA-256 and return `sha256:<lowercase hex>`
pub async fn compute_file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Locate the JSON document in pack output
///
/// Lifecycle scripts (`prepack`, `prepare`) print to stdout before the JSON.
fn parse_pack_entry(stdout: &str) -> Option<PackEntry> {
    let trimmed = stdout.trim();
    let start = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        0
    } else {
        trimmed
            .find("\n[")
            .or_else(|| trimmed.find("\n{"))
            .map(|i| i + 1)?
    };

    let value: serde_json::Value = serde_json::from_str(&trimmed[start..]).ok()?;
    let entry = match value {
        serde_json::Value::Array(items) => items.into_iter().next()?,
        object @ serde_json::Value::Object(_) => object,
        _ => return None,
    };

    serde_json::from_value(entry).ok()
}

pub struct Packer {
    runner: Arc<dyn CommandRunner>,
    scratch: TempDir,
}

impl Packer {
    /// Create a packer with a fresh scratch directory under the system temp dir
    pub fn new(runner: Arc<dyn CommandRunner>) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("release-publisher-pack-")
            .tempdir()?;
        Ok(Self { runner, scratch })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Pack `directory` and digest the resulting tarball
    pub async fn pack_and_compute_digest(
        &self,
        directory: &Path,
        package_manager: PackageManager,
    ) -> Option<PrePackedTarball> {
        let destination = match tempfile::Builder::new()
            .prefix("pack-")
            .tempdir_in(self.scratch.path())
        {
            // Removed together with the scratch directory
            Ok(dir) => dir.keep(),
            Err(e) => {
                tracing::warn!(directory = %directory.display(), error = %e, "cannot create pack destination");
                return None;
            }
        };

        let spec = package_manager.command(Operation::Pack).with_args([
            "--json".to_string(),
            "--pack-destination".to_string(),
            destination.display().to_string(),
        ]);

        let output = match self.runner.run(spec.program, &spec.args, Some(directory)).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                tracing::warn!(
                    directory = %directory.display(),
                    exit_code = output.exit_code,
                    stderr = %output.stderr.trim(),
                    "pack failed"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(directory = %directory.display(), error = %e, "pack failed");
                return None;
            }
        };

        let Some(entry) = parse_pack_entry(&output.stdout) else {
            tracing::warn!(directory = %directory.display(), "pack output has no filename");
            return None;
        };

        let reported = Path::new(&entry.filename);
        let path = if reported.is_absolute() {
            reported.to_path_buf()
        } else {
            destination.join(reported)
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.filename.clone());

        let digest = match compute_file_digest(&path).await {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "packed tarball not readable");
                return None;
            }
        };

        tracing::info!(directory = %directory.display(), %filename, %digest, "packed");
        Some(PrePackedTarball {
            path,
            digest,
            filename,
            shasum: entry.shasum,
        })
    }

    /// Shasum of what would be packed, without writing a tarball
    pub async fn get_local_tarball_integrity(
        &self,
        directory: &Path,
        package_manager: PackageManager,
    ) -> Option<String> {
        let spec = package_manager
            .command(Operation::Pack)
            .with_args(["--dry-run", "--json"]);

        match self.runner.run(spec.program, &spec.args, Some(directory)).await {
            Ok(output) if output.success() => {
                let shasum = parse_pack_entry(&output.stdout).and_then(|entry| entry.shasum);
                if shasum.is_none() {
                    tracing::debug!(directory = %directory.display(), "dry-run pack reported no shasum");
                }
                shasum
            }
            Ok(output) => {
                tracing::debug!(
                    directory = %directory.display(),
                    exit_code = output.exit_code,
                    "dry-run pack failed"
                );
                None
            }
            Err(e) => {
                tracing::debug!(directory = %directory.display(), error = %e, "dry-run pack failed");
                None
            }
        }
    }
}
