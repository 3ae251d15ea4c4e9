//! Registry-facing building blocks: version probing, packing and digest comparison

pub mod pack;
pub mod probe;

pub use pack::{Packer, PrePackedTarball, compute_file_digest};
pub use probe::{DistInfo, RegistryProbe, VersionCheckResult, VersionInfo};

use serde::{Deserialize, Serialize};

/// Outcome of comparing a local content digest with the registry's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityComparison {
    /// Same bytes are already on the registry
    Identical,
    /// Different bytes under the same version
    Different,
    /// At least one side has no digest
    Unknown,
}

fn normalize_digest(digest: Option<&str>) -> Option<String> {
    digest
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}

/// Compare a local shasum with the registry-reported `dist.shasum`
pub fn compare_integrity(local: Option<&str>, remote: Option<&str>) -> IntegrityComparison {
    match (normalize_digest(local), normalize_digest(remote)) {
        (Some(local), Some(remote)) if local == remote => IntegrityComparison::Identical,
        (Some(_), Some(_)) => IntegrityComparison::Different,
        _ => IntegrityComparison::Unknown,
    }
}
