//! Pre-Publish Validator
//!
//! Admission control for the whole batch. Every (package, target) pair is
//! classified before any publish command runs, and a single `error` anywhere
//! rejects the batch.
//!
//! # Example
//!
//! ```no_run
//! use release_publisher::validation::PrePublishValidator;
//! # use release_publisher::registry::{Packer, RegistryProbe};
//! # use release_publisher::core::PackageManager;
//! # async fn demo(probe: RegistryProbe, packer: Packer, packages: Vec<release_publisher::targets::PackageTargets>) {
//! let validator = PrePublishValidator::new(&probe, &packer, PackageManager::Npm, false);
//! let summary = validator.validate_all(&packages).await;
//! if !summary.is_admissible() {
//!     eprintln!("{}", summary.failure_messages().join("\n"));
//! }
//! # }
//! ```

use crate::core::error::PublishError;
use crate::core::package_manager::PackageManager;
use crate::registry::{IntegrityComparison, Packer, RegistryProbe, VersionCheckResult, compare_integrity};
use crate::security::SecureTokenManager;
use crate::targets::{PackageTargets, Protocol, ResolvedTarget};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Admission status of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreValidationStatus {
    /// Version absent, publish it
    Ready,
    /// Identical content already published, nothing to do
    Skip,
    /// Blocks the whole batch
    Error,
}

/// Pre-validation outcome for one (package, target) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPreValidation {
    pub target: ResolvedTarget,
    pub package_name: String,
    pub version: String,
    pub status: PreValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_check: Option<VersionCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_integrity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_integrity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetPreValidation {
    fn new(package_name: &str, version: &str, target: &ResolvedTarget) -> Self {
        Self {
            target: target.clone(),
            package_name: package_name.to_string(),
            version: version.to_string(),
            status: PreValidationStatus::Ready,
            version_check: None,
            local_integrity: None,
            remote_integrity: None,
            error: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.status = PreValidationStatus::Error;
        self.error = Some(error.into());
        self
    }

    /// `(package, registry)` key used to honour skips while publishing
    pub fn key(&self) -> (String, String) {
        (
            self.package_name.clone(),
            self.target.registry_key().to_string(),
        )
    }
}

/// Aggregated pre-validation over the whole batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreValidationSummary {
    pub results: Vec<TargetPreValidation>,
}

impl PreValidationSummary {
    fn with_status(
        &self,
        status: PreValidationStatus,
    ) -> impl Iterator<Item = &TargetPreValidation> {
        self.results.iter().filter(move |r| r.status == status)
    }

    pub fn errors(&self) -> Vec<&TargetPreValidation> {
        self.with_status(PreValidationStatus::Error).collect()
    }

    pub fn skips(&self) -> Vec<&TargetPreValidation> {
        self.with_status(PreValidationStatus::Skip).collect()
    }

    pub fn ready(&self) -> Vec<&TargetPreValidation> {
        self.with_status(PreValidationStatus::Ready).collect()
    }

    /// All-or-nothing: admissible only when no target is in error
    pub fn is_admissible(&self) -> bool {
        self.with_status(PreValidationStatus::Error).next().is_none()
    }

    pub fn skip_keys(&self) -> HashSet<(String, String)> {
        self.with_status(PreValidationStatus::Skip)
            .map(TargetPreValidation::key)
            .collect()
    }

    /// One `name@version -> registry: reason` line per errored target
    pub fn failure_messages(&self) -> Vec<String> {
        self.with_status(PreValidationStatus::Error)
            .map(|r| {
                format!(
                    "{}@{} -> {}: {}",
                    r.package_name,
                    r.version,
                    r.target.registry_key(),
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }

    /// Batch-level error for an inadmissible summary
    pub fn to_error(&self) -> Option<PublishError> {
        if self.is_admissible() {
            None
        } else {
            Some(PublishError::PreValidationFailed {
                failures: self.failure_messages(),
            })
        }
    }
}

pub struct PrePublishValidator<'a> {
    probe: &'a RegistryProbe,
    packer: &'a Packer,
    package_manager: PackageManager,
    strict: bool,
    tokens: Option<&'a SecureTokenManager>,
}

impl<'a> PrePublishValidator<'a> {
    /// `strict` turns "cannot compare digests" into an error instead of a skip
    pub fn new(
        probe: &'a RegistryProbe,
        packer: &'a Packer,
        package_manager: PackageManager,
        strict: bool,
    ) -> Self {
        Self {
            probe,
            packer,
            package_manager,
            strict,
            tokens: None,
        }
    }

    /// Mask known tokens in error text, which may quote registry output
    pub fn with_token_masking(mut self, tokens: &'a SecureTokenManager) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Classify every target of every package
    ///
    /// Runs to completion even after the first error so that the caller can
    /// report every problem at once.
    pub async fn validate_all(&self, packages: &[PackageTargets]) -> PreValidationSummary {
        let mut results = Vec::new();

        for package in packages {
            for target in &package.targets {
                let mut result = self
                    .validate_target(&package.name, &package.version, target)
                    .await;
                if let Some(tokens) = self.tokens {
                    result.error = result.error.map(|error| tokens.mask_tokens_in_string(&error));
                }

                match result.status {
                    PreValidationStatus::Ready => {
                        tracing::info!(package = %package.name, registry = target.registry_key(), "ready")
                    }
                    PreValidationStatus::Skip => {
                        tracing::info!(package = %package.name, registry = target.registry_key(), "already published, skipping")
                    }
                    PreValidationStatus::Error => tracing::error!(
                        package = %package.name,
                        registry = target.registry_key(),
                        error = result.error.as_deref().unwrap_or_default(),
                        "pre-validation failed"
                    ),
                }
                results.push(result);
            }
        }

        PreValidationSummary { results }
    }

    pub async fn validate_target(
        &self,
        package_name: &str,
        version: &str,
        target: &ResolvedTarget,
    ) -> TargetPreValidation {
        let result = TargetPreValidation::new(package_name, version, target);

        // Build output directories only exist once the build ran
        let is_dir = tokio::fs::metadata(&target.directory)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return result.with_error(format!(
                "Target directory does not exist: {}",
                target.directory.display()
            ));
        }

        if target.protocol == Protocol::Jsr {
            // JSR validates at publish time
            return result;
        }

        let check = self
            .probe
            .check_version_exists(
                package_name,
                version,
                target.registry.as_deref(),
                self.package_manager,
            )
            .await;

        let mut result = TargetPreValidation {
            version_check: Some(check.clone()),
            ..result
        };

        if !check.success {
            let message = check.error.as_deref().unwrap_or("unknown error");
            return result.with_error(format!("Registry query failed: {}", message));
        }

        if !check.version_exists {
            return result;
        }

        let local = self
            .packer
            .get_local_tarball_integrity(&target.directory, self.package_manager)
            .await;
        let remote = check.remote_shasum().map(str::to_string);
        result.local_integrity = local.clone();
        result.remote_integrity = remote.clone();

        match compare_integrity(local.as_deref(), remote.as_deref()) {
            IntegrityComparison::Identical => {
                result.status = PreValidationStatus::Skip;
                result
            }
            IntegrityComparison::Different => {
                let error = PublishError::ContentMismatch {
                    registry: target.registry_key().to_string(),
                    local: local.unwrap_or_default(),
                    remote: remote.unwrap_or_default(),
                };
                result.with_error(error.to_string())
            }
            IntegrityComparison::Unknown if self.strict => result.with_error(format!(
                "Cannot verify content of published {}@{}: local={}, remote={}",
                package_name,
                version,
                local.as_deref().unwrap_or("unavailable"),
                remote.as_deref().unwrap_or("unavailable")
            )),
            IntegrityComparison::Unknown => {
                tracing::warn!(
                    package = package_name,
                    version,
                    registry = target.registry_key(),
                    "version exists but content cannot be compared, skipping"
                );
                result.status = PreValidationStatus::Skip;
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::{RetryManager, RetryOptions};
    use crate::core::traits::CommandOutput;
    use crate::targets::{Access, NPM_REGISTRY};
    use crate::testing::{ScriptedRunner, pack_responder, view_json, view_not_found};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        runner: Arc<ScriptedRunner>,
        probe: RegistryProbe,
        packer: Packer,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let runner = Arc::new(ScriptedRunner::new());
            let probe = RegistryProbe::new(runner.clone(), RetryManager::new(RetryOptions::immediate(1)));
            let packer = Packer::new(runner.clone()).unwrap();
            Self {
                runner,
                probe,
                packer,
                dir: TempDir::new().unwrap(),
            }
        }

        fn validator(&self, strict: bool) -> PrePublishValidator<'_> {
            PrePublishValidator::new(&self.probe, &self.packer, PackageManager::Npm, strict)
        }

        fn target(&self, protocol: Protocol) -> ResolvedTarget {
            target_in(self.dir.path(), protocol)
        }
    }

    fn target_in(directory: &Path, protocol: Protocol) -> ResolvedTarget {
        ResolvedTarget {
            protocol,
            registry: (protocol == Protocol::Npm).then(|| NPM_REGISTRY.to_string()),
            directory: directory.to_path_buf(),
            access: Access::Public,
            provenance: true,
            tag: "latest".to_string(),
            token_env: None,
        }
    }

    #[tokio::test]
    async fn test_absent_version_is_ready() {
        let fixture = Fixture::new();
        fixture.runner.on("npm view", view_not_found("pkg", "1.0.0"));

        let result = fixture
            .validator(false)
            .validate_target("pkg", "1.0.0", &fixture.target(Protocol::Npm))
            .await;
        assert_eq!(result.status, PreValidationStatus::Ready);
    }

    #[tokio::test]
    async fn test_identical_content_is_skipped() {
        let fixture = Fixture::new();
        fixture
            .runner
            .on("npm view", CommandOutput::ok(view_json("pkg", "1.0.0", "same")));
        fixture
            .runner
            .on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"x", "same"));

        let result = fixture
            .validator(false)
            .validate_target("pkg", "1.0.0", &fixture.target(Protocol::Npm))
            .await;

        assert_eq!(result.status, PreValidationStatus::Skip);
        assert_eq!(result.local_integrity.as_deref(), Some("same"));
    }

    #[tokio::test]
    async fn test_different_content_is_an_error() {
        let fixture = Fixture::new();
        fixture
            .runner
            .on("npm view", CommandOutput::ok(view_json("pkg", "1.0.0", "remote111")));
        fixture
            .runner
            .on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"x", "local222"));

        let result = fixture
            .validator(false)
            .validate_target("pkg", "1.0.0", &fixture.target(Protocol::Npm))
            .await;

        assert_eq!(result.status, PreValidationStatus::Error);
        let error = result.error.unwrap();
        assert!(error.contains("Content mismatch"));
        assert!(error.contains("local222"));
        assert!(error.contains("remote111"));
    }

    #[tokio::test]
    async fn test_unknown_integrity_skips_unless_strict() {
        let fixture = Fixture::new();
        fixture
            .runner
            .on("npm view", CommandOutput::ok(view_json("pkg", "1.0.0", "remote111")));
        fixture
            .runner
            .on("npm pack", CommandOutput::failed(1, "pack broke"));

        let target = fixture.target(Protocol::Npm);
        let lenient = fixture.validator(false).validate_target("pkg", "1.0.0", &target).await;
        assert_eq!(lenient.status, PreValidationStatus::Skip);

        let strict = fixture.validator(true).validate_target("pkg", "1.0.0", &target).await;
        assert_eq!(strict.status, PreValidationStatus::Error);
        assert!(strict.error.unwrap().contains("local=unavailable"));
    }

    #[tokio::test]
    async fn test_jsr_is_ready_without_probe() {
        let fixture = Fixture::new();
        let result = fixture
            .validator(false)
            .validate_target("@acme/pkg", "1.0.0", &fixture.target(Protocol::Jsr))
            .await;

        assert_eq!(result.status, PreValidationStatus::Ready);
        assert!(fixture.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let fixture = Fixture::new();
        let target = target_in(&fixture.dir.path().join("dist/npm"), Protocol::Npm);

        let result = fixture
            .validator(false)
            .validate_target("pkg", "1.0.0", &target)
            .await;

        assert_eq!(result.status, PreValidationStatus::Error);
        assert!(result.error.unwrap().contains("does not exist"));
        assert!(fixture.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_summary_is_all_or_nothing() {
        let fixture = Fixture::new();
        fixture.runner.on("npm view a@", view_not_found("a", "1.0.0"));
        fixture
            .runner
            .on("npm view b@", CommandOutput::failed(1, "npm error code E401"));

        let packages = vec![
            PackageTargets {
                name: "a".to_string(),
                version: "1.0.0".to_string(),
                path: fixture.dir.path().to_path_buf(),
                targets: vec![fixture.target(Protocol::Npm), fixture.target(Protocol::Jsr)],
            },
            PackageTargets {
                name: "b".to_string(),
                version: "2.0.0".to_string(),
                path: fixture.dir.path().to_path_buf(),
                targets: vec![fixture.target(Protocol::Npm)],
            },
        ];

        let summary = fixture.validator(false).validate_all(&packages).await;

        assert_eq!(summary.results.len(), 3);
        assert_eq!(summary.ready().len(), 2);
        assert!(!summary.is_admissible());

        let messages = summary.failure_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("b@2.0.0 -> https://registry.npmjs.org/"));
        assert!(messages[0].contains("E401"));

        let error = summary.to_error().unwrap();
        assert!(error.to_string().contains("Pre-validation failed"));
    }

    #[test]
    fn test_skip_keys() {
        let dir = TempDir::new().unwrap();
        let mut skipped = TargetPreValidation::new("pkg", "1.0.0", &target_in(dir.path(), Protocol::Npm));
        skipped.status = PreValidationStatus::Skip;
        let ready = TargetPreValidation::new("pkg", "1.0.0", &target_in(dir.path(), Protocol::Jsr));

        let summary = PreValidationSummary {
            results: vec![skipped, ready],
        };

        let keys = summary.skip_keys();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&("pkg".to_string(), NPM_REGISTRY.to_string())));
        assert!(summary.is_admissible());
        assert!(summary.to_error().is_none());
    }
}
