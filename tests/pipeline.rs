//! End-to-end runs of the publish pipeline against a scripted package manager

use async_trait::async_trait;
use release_publisher::core::config::{PipelineConfig, RetryConfig};
use release_publisher::core::traits::{AuthSetupResult, CommandOutput, RegistryAuth};
use release_publisher::registry::IntegrityComparison;
use release_publisher::targets::GITHUB_REGISTRY;
use release_publisher::testing::{ScriptedRunner, pack_responder, view_json, view_not_found};
use release_publisher::{PreDetectedRelease, PublishOrchestrator, PublishPackagesResult, ResolvedTarget};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

struct StaticAuth;

#[async_trait]
impl RegistryAuth for StaticAuth {
    async fn configure(&self, targets: &[ResolvedTarget]) -> anyhow::Result<AuthSetupResult> {
        Ok(AuthSetupResult {
            success: true,
            configured_registries: targets.iter().map(|t| t.registry_key().to_string()).collect(),
            missing_tokens: Vec::new(),
        })
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryConfig {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        },
        ..PipelineConfig::default()
    }
}

fn write_package(root: &Path, relative: &str, manifest: &str) -> PathBuf {
    let dir = root.join(relative);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("package.json"), manifest).unwrap();
    dir
}

fn release(name: &str, dir: &Path) -> PreDetectedRelease {
    PreDetectedRelease {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        path: Some(dir.to_path_buf()),
    }
}

fn npm_runner() -> Arc<ScriptedRunner> {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("npm run build", CommandOutput::ok("built"));
    runner.on("npm view", view_not_found("widgets", "1.0.0"));
    runner.on_with("npm pack", pack_responder("widgets-1.0.0.tgz", b"widgets tarball", "abc123"));
    runner.on("npm publish", CommandOutput::ok("+ widgets@1.0.0"));
    runner
}

async fn publish(root: &Path, runner: &Arc<ScriptedRunner>, releases: &[PreDetectedRelease]) -> PublishPackagesResult {
    PublishOrchestrator::new(root, config(), runner.clone(), &HashMap::new())
        .unwrap()
        .with_auth(Arc::new(StaticAuth))
        .publish_packages(releases)
        .await
        .unwrap()
}

/// Package with the given targets, each publishing from `dist/<name>`
fn split_package(root: &Path, targets: &str) -> PathBuf {
    let dir = write_package(
        root,
        "packages/widgets",
        &format!(
            r#"{{"name": "widgets", "version": "1.0.0", "publishConfig": {{"access": "public", "targets": [{}]}}}}"#,
            targets
        ),
    );
    write_package(&dir, "dist/npm", r#"{"name": "widgets", "version": "1.0.0"}"#);
    write_package(&dir, "dist/github", r#"{"name": "widgets", "version": "1.0.0"}"#);
    dir
}

#[tokio::test]
async fn test_single_target_happy_path() {
    let temp = TempDir::new().unwrap();
    let dir = write_package(
        temp.path(),
        "packages/widgets",
        r#"{"name": "widgets", "version": "1.0.0", "publishConfig": {"access": "public"}}"#,
    );
    let runner = npm_runner();

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(result.success);
    assert_eq!(result.total_packages, 1);
    assert_eq!(result.successful_packages, 1);
    assert_eq!(result.total_targets, 1);
    assert_eq!(result.successful_targets, 1);

    let calls = runner.calls();
    let build = calls.iter().position(|c| c.command_line().contains("npm run build")).unwrap();
    let view = calls.iter().position(|c| c.command_line().contains("npm view")).unwrap();
    assert!(build < view);

    let publishes = runner.calls_matching("npm publish");
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].arg_after("--access"), Some("public"));
    assert!(publishes[0].has_arg("--provenance"));
    assert_eq!(runner.count("--pack-destination"), 1);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let dir = write_package(temp.path(), "pkg", r#"{"name": "widgets", "version": "1.0.0"}"#);
    let runner = npm_runner();
    let published = Arc::new(AtomicBool::new(false));

    let seen = published.clone();
    runner.on_with("npm view", move |_| {
        Ok(if seen.load(Ordering::SeqCst) {
            CommandOutput::ok(view_json("widgets", "1.0.0", "abc123"))
        } else {
            view_not_found("widgets", "1.0.0")
        })
    });
    let flag = published.clone();
    runner.on_with("npm publish", move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(CommandOutput::ok("+ widgets@1.0.0"))
    });

    let first = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;
    assert!(first.success);
    assert!(!first.packages[0].targets[0].result.already_published);

    let second = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;
    assert!(second.success);
    let target = &second.packages[0].targets[0].result;
    assert!(target.already_published);
    assert_eq!(target.already_published_reason, Some(IntegrityComparison::Identical));
    assert_eq!(runner.count("npm publish"), 1);
}

#[tokio::test]
async fn test_content_mismatch_blocks_the_whole_batch() {
    let temp = TempDir::new().unwrap();
    let alpha = write_package(temp.path(), "packages/alpha", r#"{"name": "alpha", "version": "1.0.0"}"#);
    let beta = write_package(temp.path(), "packages/beta", r#"{"name": "beta", "version": "1.0.0"}"#);
    let runner = npm_runner();
    runner.on("npm view beta@1.0.0", CommandOutput::ok(view_json("beta", "1.0.0", "remote999")));

    let result = publish(temp.path(), &runner, &[release("alpha", &alpha), release("beta", &beta)]).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().starts_with("Pre-validation failed"));
    assert_eq!(result.pre_validation_errors.len(), 1);
    assert_eq!(result.pre_validation_errors[0].package_name, "beta");
    assert_eq!(runner.count("npm publish"), 0);
    assert_eq!(runner.count("--pack-destination"), 0);
}

#[tokio::test]
async fn test_registry_auth_failure_blocks_the_whole_batch() {
    let temp = TempDir::new().unwrap();
    let dir = write_package(temp.path(), "pkg", r#"{"name": "widgets", "version": "1.0.0"}"#);
    let runner = npm_runner();
    runner.on(
        "npm view",
        CommandOutput::failed(1, "npm error code E401\nnpm error Unable to authenticate"),
    );

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("Pre-validation failed"));
    assert!(error.contains("E401"));
    assert_eq!(runner.count("npm publish"), 0);
}

#[tokio::test]
async fn test_identical_target_is_skipped_and_its_directory_not_packed() {
    let temp = TempDir::new().unwrap();
    let dir = split_package(
        temp.path(),
        r#"{"protocol": "npm", "registry": "https://registry.npmjs.org", "directory": "dist/npm"},
           {"protocol": "npm", "registry": "https://npm.pkg.github.com", "directory": "dist/github"}"#,
    );
    let runner = npm_runner();
    runner.on_match(
        |call| call.has_arg("view") && call.arg_after("--registry") == Some(GITHUB_REGISTRY),
        |_| Ok(CommandOutput::ok(view_json("widgets", "1.0.0", "abc123"))),
    );

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(result.success);
    assert_eq!(result.successful_targets, 2);

    let packs = runner.calls_matching("--pack-destination");
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0].cwd.as_deref(), Some(dir.join("dist/npm").as_path()));

    let publishes = runner.calls_matching("npm publish");
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].cwd.as_deref(), Some(dir.join("dist/npm").as_path()));

    let github = result.packages[0]
        .targets
        .iter()
        .find(|t| t.target.registry_key() == GITHUB_REGISTRY)
        .unwrap();
    assert!(github.result.already_published);
    assert_eq!(github.result.already_published_reason, Some(IntegrityComparison::Identical));
}

#[tokio::test]
async fn test_targets_sharing_a_directory_share_one_tarball() {
    let temp = TempDir::new().unwrap();
    let dir = split_package(
        temp.path(),
        r#""npm", {"protocol": "npm", "registry": "https://npm.pkg.github.com"}"#,
    );
    let runner = npm_runner();

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(result.success);
    assert_eq!(runner.count("--pack-destination"), 1);
    assert_eq!(runner.count("npm publish"), 2);

    let digests: Vec<_> = result.packages[0]
        .targets
        .iter()
        .map(|t| t.result.tarball_digest.clone())
        .collect();
    assert_eq!(digests.len(), 2);
    assert!(digests[0].as_deref().unwrap().starts_with("sha256:"));
    assert_eq!(digests[0], digests[1]);

    let tarballs: Vec<_> = runner
        .calls_matching("npm publish")
        .iter()
        .map(|c| c.args[1].clone())
        .collect();
    assert_eq!(tarballs[0], tarballs[1]);
}

#[tokio::test]
async fn test_publish_race_with_different_content_fails_the_target() {
    let temp = TempDir::new().unwrap();
    let dir = write_package(temp.path(), "pkg", r#"{"name": "widgets", "version": "1.0.0"}"#);
    let runner = npm_runner();
    let views = Arc::new(AtomicUsize::new(0));
    let counter = views.clone();
    // Absent for pre-validation and the pre-publish re-check, present afterwards
    runner.on_with("npm view", move |_| {
        Ok(if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            view_not_found("widgets", "1.0.0")
        } else {
            CommandOutput::ok(view_json("widgets", "1.0.0", "remote999"))
        })
    });
    runner.on(
        "npm publish",
        CommandOutput::failed(
            1,
            "npm error code E403\nnpm error 403 You cannot publish over the previously published versions: 1.0.0.",
        ),
    );

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(!result.success);
    let target = &result.packages[0].targets[0].result;
    assert!(!target.success);
    assert!(target.already_published);
    assert_eq!(target.already_published_reason, Some(IntegrityComparison::Different));
    let error = target.error.as_deref().unwrap();
    assert!(error.contains("abc123"));
    assert!(error.contains("remote999"));
    assert_eq!(views.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_build_failure_publishes_nothing() {
    let temp = TempDir::new().unwrap();
    let dir = write_package(temp.path(), "pkg", r#"{"name": "widgets", "version": "1.0.0"}"#);
    let runner = npm_runner();
    runner.on("npm run build", CommandOutput::failed(1, "rollup: entry not found"));

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Build failed"));
    assert_eq!(result.build_error.as_deref(), Some("rollup: entry not found"));
    assert!(result.packages.is_empty());
    assert_eq!(runner.count("npm view"), 0);
    assert_eq!(runner.count("npm pack"), 0);
}

#[tokio::test]
async fn test_each_directory_is_packed_once_from_its_own_path() {
    let temp = TempDir::new().unwrap();
    let dir = split_package(
        temp.path(),
        r#"{"protocol": "npm", "registry": "https://registry.npmjs.org", "directory": "dist/npm"},
           {"protocol": "npm", "registry": "https://npm.pkg.github.com", "directory": "dist/github"}"#,
    );
    let runner = npm_runner();

    let result = publish(temp.path(), &runner, &[release("widgets", &dir)]).await;

    assert!(result.success);
    assert_eq!(result.successful_targets, 2);
    assert_eq!(runner.count("--pack-destination"), 2);

    let mut pack_dirs: Vec<PathBuf> = runner
        .calls_matching("--pack-destination")
        .into_iter()
        .filter_map(|call| call.cwd)
        .collect();
    pack_dirs.sort();
    let mut expected = vec![dir.join("dist/npm"), dir.join("dist/github")];
    expected.sort();
    assert_eq!(pack_dirs, expected);

    let publish_dirs: Vec<_> = runner
        .calls_matching("npm publish")
        .into_iter()
        .filter_map(|call| call.cwd)
        .collect();
    assert_eq!(publish_dirs, vec![dir.join("dist/npm"), dir.join("dist/github")]);
}
