//! Registry probe
//!
//! Asks the registry, through the package manager's `view` command, whether
//! an exact `name@version` exists. Never returns an error: every outcome is
//! a [`VersionCheckResult`].

use crate::core::package_manager::{Operation, PackageManager};
use crate::core::retry::RetryManager;
use crate::core::traits::CommandRunner;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Output fragments meaning "no such version", not a failure
const NOT_FOUND_SIGNATURES: &[&str] = &[
    "E404",
    "404 Not Found",
    "Not Found - 404",
    "is not in this registry",
    "is not in the npm registry",
    "No match found for version",
];

/// `dist` section of a registry version document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistInfo {
    /// SHA-1 hex of the published tarball
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
}

/// Version metadata as printed by `npm view <name>@<version> --json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub versions: Vec<String>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    #[serde(default)]
    pub dist: DistInfo,
}

// npm prints a bare string instead of a list when only one version exists
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(version)) => vec![version],
        Some(OneOrMany::Many(versions)) => versions,
        None => Vec::new(),
    })
}

/// Result of a version existence check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheckResult {
    /// The registry answered; `false` means the state of the version is unknown
    pub success: bool,
    pub version_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_info: Option<VersionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VersionCheckResult {
    pub fn not_found() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn found(info: VersionInfo) -> Self {
        Self {
            success: true,
            version_exists: true,
            version_info: Some(info),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Registry-reported SHA-1 of the existing version
    pub fn remote_shasum(&self) -> Option<&str> {
        self.version_info.as_ref()?.dist.shasum.as_deref()
    }
}

fn is_not_found(output: &str) -> bool {
    NOT_FOUND_SIGNATURES.iter().any(|sig| output.contains(sig))
}

/// Registry probe over the package manager's `view` command
#[derive(Clone)]
pub struct RegistryProbe {
    runner: Arc<dyn CommandRunner>,
    retry: RetryManager,
}

impl RegistryProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, retry: RetryManager) -> Self {
        Self { runner, retry }
    }

    /// Check whether `name@version` is on the registry
    ///
    /// Transient network failures are retried; the final outcome is still a
    /// failed result, never an error.
    pub async fn check_version_exists(
        &self,
        name: &str,
        version: &str,
        registry: Option<&str>,
        package_manager: PackageManager,
    ) -> VersionCheckResult {
        let mut spec = package_manager
            .command(Operation::View)
            .with_args([format!("{}@{}", name, version), "--json".to_string()]);
        if let Some(registry) = registry {
            spec = spec.with_args(["--registry", registry]);
        }

        let outcome = self
            .retry
            .retry(|| {
                let spec = &spec;
                async move {
                    match self.runner.run(spec.program, &spec.args, None).await {
                        Ok(output) if output.success() => {
                            Ok(parse_view_output(&output.stdout, version))
                        }
                        Ok(output) => {
                            let combined = output.combined();
                            if is_not_found(&combined) {
                                Ok(VersionCheckResult::not_found())
                            } else if RetryManager::is_retryable_message(&combined) {
                                Err(combined)
                            } else {
                                Ok(VersionCheckResult::failed(failure_message(
                                    output.exit_code,
                                    &combined,
                                )))
                            }
                        }
                        Err(e) => Err(e.to_string()),
                    }
                }
            })
            .await;

        let result = outcome.unwrap_or_else(|message| {
            VersionCheckResult::failed(failure_message(-1, &message))
        });

        tracing::debug!(
            package = name,
            version,
            registry = registry.unwrap_or("default"),
            success = result.success,
            exists = result.version_exists,
            "version probe"
        );
        result
    }
}

fn failure_message(exit_code: i32, output: &str) -> String {
    let detail = output.trim();
    if detail.is_empty() {
        format!("registry query exited with code {}", exit_code)
    } else {
        detail.to_string()
    }
}

fn parse_view_output(stdout: &str, version: &str) -> VersionCheckResult {
    let body = stdout.trim();
    if body.is_empty() {
        return VersionCheckResult::not_found();
    }

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return VersionCheckResult::failed(format!("Malformed registry response: {}", e)),
    };

    // A version range may print one document per matching version
    let document = match value {
        serde_json::Value::Array(items) => {
            let matching = items
                .iter()
                .position(|item| item.get("version").and_then(|v| v.as_str()) == Some(version));
            match matching {
                Some(index) => items[index].clone(),
                None => return VersionCheckResult::not_found(),
            }
        }
        other => other,
    };

    if let Some(error) = document.get("error") {
        let text = error.to_string();
        return if is_not_found(&text) {
            VersionCheckResult::not_found()
        } else {
            VersionCheckResult::failed(text)
        };
    }

    match serde_json::from_value::<VersionInfo>(document) {
        Ok(info) if !info.name.is_empty() && info.version == version => VersionCheckResult::found(info),
        // The registry described some other version
        Ok(info) if !info.name.is_empty() && !info.version.is_empty() => VersionCheckResult::not_found(),
        Ok(_) => VersionCheckResult::failed("Malformed registry response: missing name or version"),
        Err(e) => VersionCheckResult::failed(format!("Malformed registry response: {}", e)),
    }
}
