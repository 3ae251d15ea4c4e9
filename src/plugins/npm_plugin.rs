//! NPM Plugin - publishing to npm-compatible registries
//!
//! The tarball is always published by path, never the directory, so the
//! published bytes are exactly the ones that were digested. Before and after
//! the publish command the registry is re-probed, which turns a lost race
//! with another publisher into an identical/different/unknown verdict
//! instead of a blind failure.

use crate::core::error::PublishError;
use crate::core::package_manager::Operation;
use crate::core::traits::CommandRunner;
use crate::plugins::{AlreadyPublishedPatterns, PublishContext, PublishResult, TargetPlugin};
use crate::registry::{IntegrityComparison, Packer, PrePackedTarball, RegistryProbe, compare_integrity};
use crate::targets::{NPM_REGISTRY, Protocol, ResolvedTarget, read_manifest};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    static ref PROVENANCE_URL: Regex =
        Regex::new(r"Provenance statement published to (?:transparency log: )?(\S+)").unwrap();
}

/// Extract the provenance URL npm prints after a `--provenance` publish
pub fn extract_provenance_url(output: &str) -> Option<String> {
    PROVENANCE_URL
        .captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Human-facing page of a published version
pub fn package_page_url(registry: &str, name: &str, version: &str) -> String {
    if registry == NPM_REGISTRY {
        format!("https://www.npmjs.com/package/{}/v/{}", name, version)
    } else {
        format!("{}{}", registry, name)
    }
}

/// NPM registry plugin
pub struct NpmPlugin {
    runner: Arc<dyn CommandRunner>,
    probe: RegistryProbe,
    packer: Arc<Packer>,
    patterns: AlreadyPublishedPatterns,
    strict: bool,
}

/// Verdict on a version that turned out to exist
enum ExistingVersion {
    Identical,
    Different { local: String, remote: String },
    Unknown,
}

impl NpmPlugin {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: RegistryProbe,
        packer: Arc<Packer>,
        patterns: AlreadyPublishedPatterns,
        strict: bool,
    ) -> Self {
        Self {
            runner,
            probe,
            packer,
            patterns,
            strict,
        }
    }

    /// Local shasum for comparison, preferring the pre-packed tarball's
    async fn local_shasum(
        &self,
        target: &ResolvedTarget,
        context: &PublishContext<'_>,
    ) -> Option<String> {
        if let Some(shasum) = context.tarball.and_then(|t| t.shasum.clone()) {
            return Some(shasum);
        }
        self.packer
            .get_local_tarball_integrity(&target.directory, context.package_manager)
            .await
    }

    /// Probe the registry; `None` when the version is absent or the probe failed
    async fn existing_version(
        &self,
        name: &str,
        version: &str,
        target: &ResolvedTarget,
        context: &PublishContext<'_>,
        result: &mut PublishResult,
    ) -> Option<ExistingVersion> {
        let check = self
            .probe
            .check_version_exists(name, version, target.registry.as_deref(), context.package_manager)
            .await;

        if !check.success {
            tracing::warn!(
                package = name,
                registry = target.registry_key(),
                error = check.error.as_deref().unwrap_or_default(),
                "registry re-check failed"
            );
            return None;
        }
        if !check.version_exists {
            return None;
        }

        let local = self.local_shasum(target, context).await;
        let remote = check.remote_shasum().map(str::to_string);
        result.local_integrity = local.clone();
        result.remote_integrity = remote.clone();

        Some(match compare_integrity(local.as_deref(), remote.as_deref()) {
            IntegrityComparison::Identical => ExistingVersion::Identical,
            IntegrityComparison::Different => ExistingVersion::Different {
                local: local.unwrap_or_default(),
                remote: remote.unwrap_or_default(),
            },
            IntegrityComparison::Unknown => ExistingVersion::Unknown,
        })
    }

    /// Turn an existing version into the final result
    fn settle_existing(
        &self,
        existing: ExistingVersion,
        target: &ResolvedTarget,
        mut result: PublishResult,
    ) -> PublishResult {
        result.already_published = true;
        match existing {
            ExistingVersion::Identical => {
                result.success = true;
                result.error = None;
                result.already_published_reason = Some(IntegrityComparison::Identical);
            }
            ExistingVersion::Different { local, remote } => {
                result.success = false;
                result.already_published_reason = Some(IntegrityComparison::Different);
                result.error = Some(
                    PublishError::ContentMismatch {
                        registry: target.registry_key().to_string(),
                        local,
                        remote,
                    }
                    .to_string(),
                );
            }
            ExistingVersion::Unknown => {
                result.already_published_reason = Some(IntegrityComparison::Unknown);
                if self.strict {
                    result.success = false;
                    result.error = Some(format!(
                        "[{}] Version already published and content cannot be verified",
                        target.registry_key()
                    ));
                } else {
                    tracing::warn!(
                        registry = target.registry_key(),
                        "version already published, content cannot be verified"
                    );
                    result.success = true;
                    result.error = None;
                }
            }
        }
        result
    }

    async fn tarball_for(
        &self,
        target: &ResolvedTarget,
        context: &PublishContext<'_>,
    ) -> Option<PrePackedTarball> {
        match context.tarball {
            Some(tarball) => Some(tarball.clone()),
            None => {
                self.packer
                    .pack_and_compute_digest(&target.directory, context.package_manager)
                    .await
            }
        }
    }

    fn publish_args(
        &self,
        target: &ResolvedTarget,
        tarball: &PrePackedTarball,
        context: &PublishContext<'_>,
    ) -> (&'static str, Vec<String>) {
        let registry = target.registry.as_deref().unwrap_or(NPM_REGISTRY);
        let mut spec = context.package_manager.command(Operation::Publish).with_args([
            tarball.path.display().to_string(),
            "--registry".to_string(),
            registry.to_string(),
            "--access".to_string(),
            target.access.to_string(),
        ]);

        if target.provenance {
            spec = spec.with_args(["--provenance"]);
        }
        if target.tag != "latest" {
            spec = spec.with_args(["--tag", target.tag.as_str()]);
        }
        spec = spec.with_args(context.package_manager.publish_extra_args().iter().copied());

        (spec.program, spec.args)
    }
}

#[async_trait]
impl TargetPlugin for NpmPlugin {
    fn protocol(&self) -> Protocol {
        Protocol::Npm
    }

    async fn publish(&self, target: &ResolvedTarget, context: &PublishContext<'_>) -> PublishResult {
        let manifest = match read_manifest(&target.directory).await {
            Ok(manifest) => manifest,
            Err(e) => return PublishResult::failure(e.to_string()),
        };
        let (name, version) = match manifest.identity(&target.directory.display().to_string()) {
            Ok((name, version)) => (name.to_string(), version.to_string()),
            Err(e) => return PublishResult::failure(e.to_string()),
        };

        let registry = target.registry.as_deref().unwrap_or(NPM_REGISTRY);
        let mut result = PublishResult {
            registry_url: Some(package_page_url(registry, &name, &version)),
            ..Default::default()
        };

        // Someone may have published since pre-validation ran
        if let Some(existing) = self
            .existing_version(&name, &version, target, context, &mut result)
            .await
        {
            tracing::info!(package = %name, version = %version, registry, "version already on registry");
            return self.settle_existing(existing, target, result);
        }

        let Some(tarball) = self.tarball_for(target, context).await else {
            result.error = Some(
                PublishError::PackFailed {
                    registry: target.registry_key().to_string(),
                    directory: target.directory.clone(),
                }
                .to_string(),
            );
            return result;
        };
        result.tarball_path = Some(tarball.path.clone());
        result.tarball_digest = Some(tarball.digest.clone());

        let (program, args) = self.publish_args(target, &tarball, context);
        tracing::info!(package = %name, version = %version, registry, tarball = %tarball.filename, "publishing");

        let output = match self.runner.run(program, &args, Some(&target.directory)).await {
            Ok(output) => output,
            Err(e) => {
                result.error = Some(
                    PublishError::PublishFailed {
                        registry: target.registry_key().to_string(),
                        message: e.to_string(),
                    }
                    .to_string(),
                );
                return result;
            }
        };

        let combined = output.combined();
        result.output = combined.clone();
        result.exit_code = Some(output.exit_code);

        if output.success() {
            result.success = true;
            result.attestation_url = extract_provenance_url(&combined);
            tracing::info!(package = %name, version = %version, registry, "published");
            return result;
        }

        if self.patterns.matches(Protocol::Npm, &combined) {
            let existing = self
                .existing_version(&name, &version, target, context, &mut result)
                .await
                .unwrap_or(ExistingVersion::Unknown);
            return self.settle_existing(existing, target, result);
        }

        result.error = Some(
            PublishError::PublishFailed {
                registry: target.registry_key().to_string(),
                message: format!("exit code {}: {}", output.exit_code, combined.trim()),
            }
            .to_string(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package_manager::PackageManager;
    use crate::core::retry::{RetryManager, RetryOptions};
    use crate::core::traits::CommandOutput;
    use crate::targets::{Access, GITHUB_REGISTRY};
    use crate::testing::{ScriptedRunner, pack_responder, view_json, view_not_found};
    use tempfile::TempDir;

    struct Fixture {
        runner: Arc<ScriptedRunner>,
        plugin: NpmPlugin,
        dir: TempDir,
    }

    fn fixture(strict: bool) -> Fixture {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = RegistryProbe::new(runner.clone(), RetryManager::new(RetryOptions::immediate(1)));
        let packer = Arc::new(Packer::new(runner.clone()).unwrap());
        let plugin = NpmPlugin::new(
            runner.clone(),
            probe,
            packer,
            AlreadyPublishedPatterns::default(),
            strict,
        );

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "pkg", "version": "1.0.0"}"#,
        )
        .unwrap();

        Fixture { runner, plugin, dir }
    }

    fn target(fixture: &Fixture) -> ResolvedTarget {
        ResolvedTarget {
            protocol: Protocol::Npm,
            registry: Some(NPM_REGISTRY.to_string()),
            directory: fixture.dir.path().to_path_buf(),
            access: Access::Public,
            provenance: true,
            tag: "latest".to_string(),
            token_env: None,
        }
    }

    fn context() -> PublishContext<'static> {
        PublishContext {
            dry_run: false,
            package_manager: PackageManager::Npm,
            tarball: None,
        }
    }

    #[tokio::test]
    async fn test_publish_packs_and_publishes_tarball() {
        let f = fixture(false);
        f.runner.on("npm view", view_not_found("pkg", "1.0.0"));
        f.runner.on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"bytes", "sha1"));
        f.runner.on(
            "npm publish",
            CommandOutput::ok(
                "npm notice Provenance statement published to transparency log: https://search.sigstore.dev/?logIndex=42\n+ pkg@1.0.0",
            ),
        );

        let result = f.plugin.publish(&target(&f), &context()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.attestation_url.as_deref(),
            Some("https://search.sigstore.dev/?logIndex=42")
        );
        assert_eq!(
            result.registry_url.as_deref(),
            Some("https://www.npmjs.com/package/pkg/v/1.0.0")
        );
        assert!(result.tarball_digest.unwrap().starts_with("sha256:"));

        let publish = &f.runner.calls_matching("npm publish")[0];
        assert!(publish.args[1].ends_with("pkg-1.0.0.tgz"));
        assert_eq!(publish.arg_after("--registry"), Some(NPM_REGISTRY));
        assert_eq!(publish.arg_after("--access"), Some("public"));
        assert!(publish.has_arg("--provenance"));
        assert!(!publish.has_arg("--tag"));
    }

    #[tokio::test]
    async fn test_publish_uses_prepacked_tarball() {
        let f = fixture(false);
        f.runner.on("npm view", view_not_found("pkg", "1.0.0"));
        f.runner.on("npm publish", CommandOutput::ok("+ pkg@1.0.0"));

        let tarball = PrePackedTarball {
            path: f.dir.path().join("prepacked.tgz"),
            digest: "sha256:feed".to_string(),
            filename: "prepacked.tgz".to_string(),
            shasum: Some("sha1".to_string()),
        };
        let context = PublishContext {
            tarball: Some(&tarball),
            ..context()
        };

        let mut target = target(&f);
        target.tag = "next".to_string();
        let result = f.plugin.publish(&target, &context).await;

        assert!(result.success);
        assert_eq!(result.tarball_digest.as_deref(), Some("sha256:feed"));
        assert_eq!(f.runner.count("npm pack"), 0);
        let publish = &f.runner.calls_matching("npm publish")[0];
        assert_eq!(publish.arg_after("--tag"), Some("next"));
    }

    #[tokio::test]
    async fn test_missing_manifest_fails_without_network() {
        let f = fixture(false);
        std::fs::remove_file(f.dir.path().join("package.json")).unwrap();

        let result = f.plugin.publish(&target(&f), &context()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("package.json not found"));
        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_identical_version_already_published() {
        let f = fixture(false);
        f.runner.on("npm view", CommandOutput::ok(view_json("pkg", "1.0.0", "same")));
        f.runner.on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"bytes", "same"));

        let result = f.plugin.publish(&target(&f), &context()).await;

        assert!(result.success);
        assert!(result.already_published);
        assert_eq!(result.already_published_reason, Some(IntegrityComparison::Identical));
        assert_eq!(f.runner.count("npm publish"), 0);
    }

    #[tokio::test]
    async fn test_race_with_different_content_fails() {
        let f = fixture(false);
        f.runner.on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"bytes", "local111"));
        f.runner.on(
            "npm publish",
            CommandOutput::failed(
                1,
                "npm error 403 You cannot publish over the previously published versions: 1.0.0.",
            ),
        );
        // Absent at the first probe, present with other bytes afterwards
        let probes = std::sync::atomic::AtomicUsize::new(0);
        f.runner.on_with("npm view", move |_| {
            if probes.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(view_not_found("pkg", "1.0.0"))
            } else {
                Ok(CommandOutput::ok(view_json("pkg", "1.0.0", "remote222")))
            }
        });

        let result = f.plugin.publish(&target(&f), &context()).await;

        assert!(!result.success);
        assert!(result.already_published);
        assert_eq!(result.already_published_reason, Some(IntegrityComparison::Different));
        let error = result.error.unwrap();
        assert!(error.contains("local111"));
        assert!(error.contains("remote222"));
    }

    #[tokio::test]
    async fn test_unknown_race_depends_on_strictness() {
        for strict in [false, true] {
            let f = fixture(strict);
            f.runner.on("npm view", view_not_found("pkg", "1.0.0"));
            f.runner.on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"bytes", "local"));
            f.runner.on("npm publish", CommandOutput::failed(1, "npm ERR! code EPUBLISHCONFLICT"));

            let result = f.plugin.publish(&target(&f), &context()).await;

            assert_eq!(result.success, !strict);
            assert_eq!(result.already_published_reason, Some(IntegrityComparison::Unknown));
        }
    }

    #[tokio::test]
    async fn test_plain_publish_failure() {
        let f = fixture(false);
        f.runner.on("npm view", view_not_found("pkg", "1.0.0"));
        f.runner.on_with("npm pack", pack_responder("pkg-1.0.0.tgz", b"bytes", "local"));
        f.runner.on("npm publish", CommandOutput::failed(1, "npm error code E403 forbidden"));

        let result = f.plugin.publish(&target(&f), &context()).await;

        assert!(!result.success);
        assert!(!result.already_published);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.error.unwrap().contains("E403"));
    }

    #[tokio::test]
    async fn test_pack_failure() {
        let f = fixture(false);
        f.runner.on("npm view", view_not_found("pkg", "1.0.0"));
        f.runner.on("npm pack", CommandOutput::failed(1, "boom"));

        let result = f.plugin.publish(&target(&f), &context()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to pack"));
        assert_eq!(f.runner.count("npm publish"), 0);
    }

    #[tokio::test]
    async fn test_pnpm_publish_skips_git_checks() {
        let f = fixture(false);
        f.runner.on("pnpm view", view_not_found("pkg", "1.0.0"));
        f.runner.on("pnpm publish", CommandOutput::ok(""));

        let tarball = PrePackedTarball {
            path: f.dir.path().join("pkg-1.0.0.tgz"),
            digest: "sha256:feed".to_string(),
            filename: "pkg-1.0.0.tgz".to_string(),
            shasum: None,
        };
        let context = PublishContext {
            dry_run: false,
            package_manager: PackageManager::Pnpm,
            tarball: Some(&tarball),
        };

        let mut target = target(&f);
        target.registry = Some(GITHUB_REGISTRY.to_string());
        target.provenance = false;
        let result = f.plugin.publish(&target, &context).await;

        assert!(result.success);
        assert_eq!(
            result.registry_url.as_deref(),
            Some("https://npm.pkg.github.com/pkg")
        );
        let publish = &f.runner.calls_matching("pnpm publish")[0];
        assert!(publish.has_arg("--no-git-checks"));
        assert!(!publish.has_arg("--provenance"));
    }

    #[test]
    fn test_extract_provenance_url() {
        assert_eq!(
            extract_provenance_url("Provenance statement published to https://example.com/x"),
            Some("https://example.com/x".to_string())
        );
        assert_eq!(extract_provenance_url("+ pkg@1.0.0"), None);
    }
}
