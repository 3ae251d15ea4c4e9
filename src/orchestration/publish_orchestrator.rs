//! Publish Orchestrator - drives one release run end to end
//!
//! Manages the complete publishing workflow:
//! - Release collection and target resolution
//! - Registry authentication and the batch build
//! - All-or-nothing pre-validation
//! - Sequential per-package, per-target publishing with tarball reuse
//! - Supplementary attestation for packages without native provenance
//!
//! Build and pre-validation failures are the only conditions that stop the
//! run before a publish command. After that, failures are per target.

use crate::core::config::PipelineConfig;
use crate::core::package_manager::Operation;
use crate::core::retry::{RetryManager, RetryOptions};
use crate::core::state_machine::{PublishStage, PublishStateMachine};
use crate::core::traits::{AttestationCreator, AttestationRequest, CommandRunner, RegistryAuth};
use crate::plugins::{
    AlreadyPublishedPatterns, JsrPlugin, NpmPlugin, PublishContext, PublishResult, TargetPublisher,
};
use crate::registry::{Packer, PrePackedTarball, RegistryProbe, compare_integrity};
use crate::release::{
    ChangesetSource, ChangesetStatusReader, CliGit, PreDetectedRelease, ReleaseDetector,
    WorkspacePackages,
};
use crate::security::{NpmrcAuthenticator, SecureTokenManager};
use crate::targets::{PackageTargets, Protocol, ResolvedTarget, read_manifest, resolve_targets};
use crate::validation::{PrePublishValidator, PreValidationSummary, TargetPreValidation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one target within a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPublishResult {
    pub target: ResolvedTarget,
    #[serde(flatten)]
    pub result: PublishResult,
}

/// Outcome of one package across all its targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePublishResult {
    pub name: String,
    pub version: String,
    pub targets: Vec<TargetPublishResult>,
    /// Every target succeeded, skips included
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_url: Option<String>,
}

/// Batch result of a publish run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPackagesResult {
    pub success: bool,
    pub packages: Vec<PackagePublishResult>,
    pub total_packages: usize,
    pub successful_packages: usize,
    pub total_targets: usize,
    pub successful_targets: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_validation_errors: Vec<TargetPreValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishPackagesResult {
    fn aggregate(packages: Vec<PackagePublishResult>) -> Self {
        let total_packages = packages.len();
        let successful_packages = packages.iter().filter(|p| p.success).count();
        let total_targets = packages.iter().map(|p| p.targets.len()).sum();
        let successful_targets = packages
            .iter()
            .flat_map(|p| &p.targets)
            .filter(|t| t.result.success)
            .count();

        Self {
            success: successful_packages == total_packages,
            packages,
            total_packages,
            successful_packages,
            total_targets,
            successful_targets,
            ..Default::default()
        }
    }
}

/// Main publish orchestrator
pub struct PublishOrchestrator {
    repo_root: PathBuf,
    config: PipelineConfig,
    runner: Arc<dyn CommandRunner>,
    tokens: Arc<SecureTokenManager>,
    probe: RegistryProbe,
    packer: Arc<Packer>,
    publisher: TargetPublisher,
    auth: Arc<dyn RegistryAuth>,
    changesets: Arc<dyn ChangesetSource>,
    attestation: Option<Arc<dyn AttestationCreator>>,
}

impl PublishOrchestrator {
    /// Wire the production collaborators around `runner`
    ///
    /// `env` is the only source of credentials; nothing here reads the
    /// process environment.
    pub fn new(
        repo_root: impl Into<PathBuf>,
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        env: &HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let repo_root = repo_root.into();
        let tokens = Arc::new(SecureTokenManager::new(env));
        let retry = RetryManager::new(RetryOptions::from(&config.retry));
        let probe = RegistryProbe::new(runner.clone(), retry);
        let packer = Arc::new(Packer::new(runner.clone())?);
        let patterns = AlreadyPublishedPatterns::from(&config.integrity);

        let publisher = TargetPublisher::new(vec![
            Box::new(NpmPlugin::new(
                runner.clone(),
                probe.clone(),
                packer.clone(),
                patterns.clone(),
                config.integrity.strict,
            )),
            Box::new(JsrPlugin::new(runner.clone(), patterns)),
        ]);

        let npmrc_path = config
            .npmrc_path
            .clone()
            .or_else(|| NpmrcAuthenticator::default_npmrc_path(env))
            .unwrap_or_else(|| {
                tracing::warn!("no home directory, writing registry credentials to the project .npmrc");
                repo_root.join(".npmrc")
            });
        let auth = Arc::new(NpmrcAuthenticator::new(tokens.clone(), npmrc_path));

        let git = Arc::new(CliGit::new(runner.clone(), repo_root.clone()));
        let changesets = Arc::new(ChangesetStatusReader::new(runner.clone(), git, repo_root.clone()));

        Ok(Self {
            repo_root,
            config,
            runner,
            tokens,
            probe,
            packer,
            publisher,
            auth,
            changesets,
            attestation: None,
        })
    }

    pub fn with_auth(mut self, auth: Arc<dyn RegistryAuth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_changeset_source(mut self, source: Arc<dyn ChangesetSource>) -> Self {
        self.changesets = source;
        self
    }

    pub fn with_attestation(mut self, creator: Arc<dyn AttestationCreator>) -> Self {
        self.attestation = Some(creator);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Release set this run would work on
    pub async fn collect_releases(
        &self,
        pre_detected: &[PreDetectedRelease],
    ) -> anyhow::Result<Vec<PreDetectedRelease>> {
        let detector = ReleaseDetector::new(
            self.changesets.as_ref(),
            self.config.package_manager,
            self.config.target_branch.clone(),
        );
        Ok(detector.resolve(pre_detected).await?)
    }

    /// Run the whole pipeline for `pre_detected`, or for changeset status when empty
    pub async fn publish_packages(
        &self,
        pre_detected: &[PreDetectedRelease],
    ) -> anyhow::Result<PublishPackagesResult> {
        let mut machine = PublishStateMachine::new();
        let dry_run = self.config.dry_run;

        // Collect releases
        machine.transition(PublishStage::CollectingReleases, None)?;
        let releases = self.collect_releases(pre_detected).await?;
        if releases.is_empty() {
            tracing::info!("no releases to publish");
            machine.transition(PublishStage::Done, Some("no releases".to_string()))?;
            return Ok(PublishPackagesResult::aggregate(Vec::new()));
        }

        // Resolve targets
        machine.transition(PublishStage::ResolvingTargets, None)?;
        let packages = self.resolve_packages(&releases).await;
        if packages.is_empty() {
            tracing::warn!(releases = releases.len(), "no release could be resolved to a package");
            machine.transition(PublishStage::Done, Some("no resolvable packages".to_string()))?;
            return Ok(PublishPackagesResult::aggregate(Vec::new()));
        }

        // Authenticate
        machine.transition(PublishStage::Authenticating, None)?;
        self.authenticate(&packages).await;

        // Build
        machine.transition(PublishStage::Building, None)?;
        if let Err(build_error) = self.build().await {
            machine.transition(PublishStage::BuildFailed, Some(build_error.clone()))?;
            tracing::debug!(history = %machine.history(), "publish run aborted");
            return Ok(PublishPackagesResult {
                success: false,
                build_error: Some(build_error),
                error: Some("Build failed".to_string()),
                ..Default::default()
            });
        }

        // Pre-validate
        machine.transition(PublishStage::PreValidating, None)?;
        let validator = PrePublishValidator::new(
            &self.probe,
            &self.packer,
            self.config.package_manager,
            self.config.integrity.strict,
        )
        .with_token_masking(&self.tokens);
        let summary = validator.validate_all(&packages).await;
        if let Some(error) = summary.to_error() {
            let errors: Vec<TargetPreValidation> = summary.errors().into_iter().cloned().collect();
            machine.transition(
                PublishStage::PreValidationFailed,
                Some(format!("{} target(s) rejected", errors.len())),
            )?;
            tracing::error!(%error, "pre-validation rejected the batch");
            return Ok(PublishPackagesResult {
                success: false,
                total_packages: packages.len(),
                total_targets: packages.iter().map(|p| p.targets.len()).sum(),
                pre_validation_errors: errors,
                error: Some(error.to_string()),
                ..Default::default()
            });
        }

        // Publish
        machine.transition(PublishStage::Publishing, None)?;
        let mut results = Vec::with_capacity(packages.len());
        for package in &packages {
            results.push(self.publish_package(package, &summary).await);
        }

        // Attest
        if !dry_run && self.config.attestation.enabled && self.attestation.is_some() {
            machine.transition(PublishStage::Attesting, None)?;
            for package in results.iter_mut() {
                self.attest(package).await;
            }
        }

        let result = PublishPackagesResult::aggregate(results);
        machine.transition(
            PublishStage::Done,
            Some(format!(
                "{}/{} packages",
                result.successful_packages, result.total_packages
            )),
        )?;

        tracing::info!(
            success = result.success,
            packages = result.total_packages,
            successful_packages = result.successful_packages,
            targets = result.total_targets,
            successful_targets = result.successful_targets,
            elapsed_ms = machine.elapsed_ms(),
            "publish run finished"
        );
        tracing::debug!(history = %machine.history(), "publish stages");

        Ok(result)
    }

    /// Locate, read and resolve every release; unresolvable ones are dropped
    pub async fn resolve_packages(&self, releases: &[PreDetectedRelease]) -> Vec<PackageTargets> {
        let workspace = if releases.iter().any(|r| r.path.is_none()) {
            match WorkspacePackages::discover(&self.repo_root).await {
                Ok(workspace) => workspace,
                Err(e) => {
                    tracing::warn!(error = %e, "workspace discovery failed");
                    WorkspacePackages::default()
                }
            }
        } else {
            WorkspacePackages::default()
        };

        let mut packages = Vec::new();
        for release in releases {
            let path = match &release.path {
                Some(path) if path.is_absolute() => path.clone(),
                Some(path) => self.repo_root.join(path),
                None => match workspace.path_of(&release.name) {
                    Some(path) => path.to_path_buf(),
                    None => {
                        tracing::warn!(package = %release.name, "package not found in workspace, skipping");
                        continue;
                    }
                },
            };

            let manifest = match read_manifest(&path).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(package = %release.name, error = %e, "cannot read manifest, skipping");
                    continue;
                }
            };

            match resolve_targets(&path, &manifest) {
                Ok(targets) => {
                    tracing::info!(
                        package = %release.name,
                        version = %release.version,
                        targets = targets.len(),
                        "resolved targets"
                    );
                    packages.push(PackageTargets {
                        name: release.name.clone(),
                        version: release.version.clone(),
                        path,
                        targets,
                    });
                }
                Err(e) => {
                    tracing::warn!(package = %release.name, error = %e, "cannot resolve targets, skipping");
                }
            }
        }

        packages
    }

    async fn authenticate(&self, packages: &[PackageTargets]) {
        let targets: Vec<ResolvedTarget> = packages
            .iter()
            .flat_map(|p| p.targets.iter().cloned())
            .collect();

        match self.auth.configure(&targets).await {
            Ok(setup) => {
                for missing in &setup.missing_tokens {
                    tracing::warn!(
                        registry = %missing.registry,
                        token_env = %missing.token_env,
                        "registry token not set, relying on OIDC"
                    );
                }
                tracing::info!(registries = setup.configured_registries.len(), "registry auth configured");
            }
            Err(e) => tracing::warn!(error = %e, "registry auth setup failed"),
        }
    }

    /// Run the build script once; `Err` carries the masked failure output
    async fn build(&self) -> Result<(), String> {
        if !self.config.build.enabled {
            tracing::info!("build disabled");
            return Ok(());
        }

        let spec = self
            .config
            .package_manager
            .command(Operation::Run)
            .with_args([self.config.build.script.clone()]);
        tracing::info!(command = %format!("{} {}", spec.program, spec.args.join(" ")), "building");

        match self.runner.run(spec.program, &spec.args, Some(&self.repo_root)).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                let captured = if output.stderr.trim().is_empty() {
                    &output.stdout
                } else {
                    &output.stderr
                };
                let masked = self.tokens.mask_tokens_in_string(captured.trim());
                tracing::error!(exit_code = output.exit_code, output = %masked, "build failed");
                Err(masked)
            }
            Err(e) => {
                let masked = self.tokens.mask_tokens_in_string(&e.to_string());
                tracing::error!(error = %masked, "build could not run");
                Err(masked)
            }
        }
    }

    async fn publish_package(
        &self,
        package: &PackageTargets,
        summary: &PreValidationSummary,
    ) -> PackagePublishResult {
        let skips: HashMap<(String, String), &TargetPreValidation> = summary
            .skips()
            .into_iter()
            .map(|s| (s.key(), s))
            .collect();
        let mut tarballs: HashMap<PathBuf, Option<PrePackedTarball>> = HashMap::new();
        let mut targets = Vec::with_capacity(package.targets.len());

        for target in &package.targets {
            let key = (package.name.clone(), target.registry_key().to_string());

            let mut result = if let Some(skip) = skips.get(&key) {
                tracing::info!(package = %package.name, registry = target.registry_key(), "already published, skipping");
                skipped_result(skip)
            } else {
                match self.tarball_for(target, &mut tarballs).await {
                    Ok(tarball) => {
                        let context = PublishContext {
                            dry_run: self.config.dry_run,
                            package_manager: self.config.package_manager,
                            tarball,
                        };
                        self.publisher.publish_to_target(target, &context).await
                    }
                    Err(result) => result,
                }
            };

            result.output = self.tokens.mask_tokens_in_string(&result.output);
            result.error = result
                .error
                .map(|error| self.tokens.mask_tokens_in_string(&error));

            if result.success {
                tracing::info!(package = %package.name, registry = target.registry_key(), "target published");
            } else {
                tracing::error!(
                    package = %package.name,
                    registry = target.registry_key(),
                    error = result.error.as_deref().unwrap_or_default(),
                    "target failed"
                );
            }

            targets.push(TargetPublishResult {
                target: target.clone(),
                result,
            });
        }

        let success = targets.iter().all(|t| t.result.success);
        let attestation_url = targets
            .iter()
            .find_map(|t| t.result.attestation_url.clone());

        PackagePublishResult {
            name: package.name.clone(),
            version: package.version.clone(),
            targets,
            success,
            attestation_url,
        }
    }

    /// Shared tarball for an npm target's directory, packing it on first use
    async fn tarball_for<'t>(
        &self,
        target: &ResolvedTarget,
        tarballs: &'t mut HashMap<PathBuf, Option<PrePackedTarball>>,
    ) -> Result<Option<&'t PrePackedTarball>, PublishResult> {
        if target.protocol != Protocol::Npm || self.config.dry_run {
            return Ok(None);
        }

        if !tarballs.contains_key(&target.directory) {
            let packed = self
                .packer
                .pack_and_compute_digest(&target.directory, self.config.package_manager)
                .await;
            tarballs.insert(target.directory.clone(), packed);
        }

        match tarballs.get(&target.directory) {
            Some(Some(tarball)) => Ok(Some(tarball)),
            _ => Err(PublishResult::failure(format!(
                "Failed to pack {}",
                target.directory.display()
            ))),
        }
    }

    async fn attest(&self, package: &mut PackagePublishResult) {
        let Some(creator) = &self.attestation else {
            return;
        };
        if !package.success || package.attestation_url.is_some() {
            return;
        }
        if package.targets.iter().all(|t| t.result.already_published) {
            tracing::debug!(package = %package.name, "nothing newly published, no attestation");
            return;
        }

        // Skipped targets carry no tarball from this run
        let Some(first) = package
            .targets
            .iter()
            .find(|t| t.result.success && t.result.tarball_digest.is_some())
        else {
            tracing::debug!(package = %package.name, "no packed tarball to attest");
            return;
        };

        let request = AttestationRequest {
            package_name: package.name.clone(),
            version: package.version.clone(),
            directory: first.target.directory.clone(),
            dry_run: self.config.dry_run,
            package_manager: self.config.package_manager,
            digest: first.result.tarball_digest.clone(),
            tarball_path: first.result.tarball_path.clone(),
        };

        let attestation = creator.create(&request).await;
        if attestation.success {
            tracing::info!(package = %package.name, url = ?attestation.attestation_url, "attestation created");
            package.attestation_url = attestation.attestation_url;
        } else {
            tracing::warn!(
                package = %package.name,
                error = attestation.error.as_deref().unwrap_or_default(),
                "attestation failed"
            );
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

/// Success record for a target pre-validation found already published
fn skipped_result(skip: &TargetPreValidation) -> PublishResult {
    PublishResult {
        success: true,
        output: format!(
            "{}@{} already published to {}",
            skip.package_name,
            skip.version,
            skip.target.registry_key()
        ),
        already_published: true,
        already_published_reason: Some(compare_integrity(
            skip.local_integrity.as_deref(),
            skip.remote_integrity.as_deref(),
        )),
        local_integrity: skip.local_integrity.clone(),
        remote_integrity: skip.remote_integrity.clone(),
        ..Default::default()
    }
}
