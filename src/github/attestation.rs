//! Supplementary build-provenance attestation
//!
//! For packages published without npm's native provenance. The tarball is
//! signed with `cosign attest-blob` and the resulting bundle is stored
//! through the GitHub attestations API.

use crate::core::traits::{AttestationCreator, AttestationRequest, AttestationResult, CommandRunner};
use crate::github::client::GithubClient;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const BUILD_TYPE: &str = "https://actions.github.io/buildtypes/workflow/v1";
const PREDICATE_TYPE: &str = "slsaprovenance1";

/// CI run details recorded in the provenance predicate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub server_url: String,
    pub repository: String,
    pub workflow_ref: String,
    pub run_id: String,
    pub run_attempt: String,
    pub sha: String,
}

impl BuildEnvironment {
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let var = |name: &str| env.get(name).cloned().unwrap_or_default();
        Self {
            server_url: env
                .get("GITHUB_SERVER_URL")
                .cloned()
                .unwrap_or_else(|| "https://github.com".to_string()),
            repository: var("GITHUB_REPOSITORY"),
            workflow_ref: var("GITHUB_WORKFLOW_REF"),
            run_id: var("GITHUB_RUN_ID"),
            run_attempt: var("GITHUB_RUN_ATTEMPT"),
            sha: var("GITHUB_SHA"),
        }
    }
}

/// Package URL of an npm package, with the scope's `@` percent-encoded
pub fn npm_purl(name: &str, version: &str) -> String {
    let name = match name.strip_prefix('@') {
        Some(scoped) => format!("%40{}", scoped),
        None => name.to_string(),
    };
    format!("pkg:npm/{}@{}", name, version)
}

fn predicate(request: &AttestationRequest, hex: &str, build: &BuildEnvironment) -> serde_json::Value {
    json!({
        "buildDefinition": {
            "buildType": BUILD_TYPE,
            "externalParameters": {
                "package": npm_purl(&request.package_name, &request.version),
                "digest": { "sha256": hex },
                "workflow": {
                    "ref": build.workflow_ref,
                    "repository": format!("{}/{}", build.server_url, build.repository),
                },
            },
            "internalParameters": {
                "packageManager": request.package_manager.as_str(),
            },
            "resolvedDependencies": [{
                "uri": format!("git+{}/{}", build.server_url, build.repository),
                "digest": { "gitCommit": build.sha },
            }],
        },
        "runDetails": {
            "builder": { "id": format!("{}/{}", build.server_url, build.workflow_ref) },
            "metadata": {
                "invocationId": format!(
                    "{}/{}/actions/runs/{}/attempts/{}",
                    build.server_url, build.repository, build.run_id, build.run_attempt
                ),
            },
        },
    })
}

pub struct CosignAttestationCreator {
    runner: Arc<dyn CommandRunner>,
    client: Arc<GithubClient>,
    build: BuildEnvironment,
}

impl CosignAttestationCreator {
    pub fn new(runner: Arc<dyn CommandRunner>, client: Arc<GithubClient>, build: BuildEnvironment) -> Self {
        Self {
            runner,
            client,
            build,
        }
    }

    async fn sign(&self, request: &AttestationRequest, hex: &str, tarball: &Path) -> Result<serde_json::Value, String> {
        let scratch = tempfile::Builder::new()
            .prefix("attestation-")
            .tempdir()
            .map_err(|e| format!("cannot create scratch directory: {}", e))?;
        let predicate_path = scratch.path().join("predicate.json");
        let bundle_path = scratch.path().join("bundle.json");

        let body = serde_json::to_vec_pretty(&predicate(request, hex, &self.build))
            .map_err(|e| e.to_string())?;
        tokio::fs::write(&predicate_path, body)
            .await
            .map_err(|e| format!("cannot write predicate: {}", e))?;

        let args: Vec<String> = vec![
            "attest-blob".to_string(),
            "--yes".to_string(),
            "--type".to_string(),
            PREDICATE_TYPE.to_string(),
            "--predicate".to_string(),
            predicate_path.display().to_string(),
            "--bundle".to_string(),
            bundle_path.display().to_string(),
            tarball.display().to_string(),
        ];

        let output = self
            .runner
            .run("cosign", &args, Some(&request.directory))
            .await
            .map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!(
                "cosign exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }

        let bundle = tokio::fs::read_to_string(&bundle_path)
            .await
            .map_err(|e| format!("cosign wrote no bundle: {}", e))?;
        serde_json::from_str(&bundle).map_err(|e| format!("invalid bundle: {}", e))
    }
}

#[async_trait]
impl AttestationCreator for CosignAttestationCreator {
    async fn create(&self, request: &AttestationRequest) -> AttestationResult {
        let failure = |error: String| {
            tracing::warn!(package = %request.package_name, %error, "attestation not created");
            AttestationResult {
                success: false,
                attestation_url: None,
                error: Some(error),
            }
        };

        if request.dry_run {
            tracing::info!(package = %request.package_name, "dry run, skipping attestation");
            return AttestationResult {
                success: true,
                ..Default::default()
            };
        }

        let Some(hex) = request
            .digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
        else {
            return failure("no sha256 tarball digest to attest".to_string());
        };
        let Some(tarball) = request.tarball_path.as_deref() else {
            return failure("no tarball to attest".to_string());
        };

        let bundle = match self.sign(request, hex, tarball).await {
            Ok(bundle) => bundle,
            Err(e) => return failure(e),
        };

        match self.client.upload_attestation(&bundle).await {
            Ok(id) => {
                let url = self.client.attestation_url(id);
                tracing::info!(package = %request.package_name, %url, "attestation uploaded");
                AttestationResult {
                    success: true,
                    attestation_url: Some(url),
                    error: None,
                }
            }
            Err(e) => failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GithubConfig;
    use crate::core::package_manager::PackageManager;
    use crate::core::retry::{RetryManager, RetryOptions};
    use crate::core::traits::CommandOutput;
    use crate::testing::ScriptedRunner;
    use secrecy::SecretString;
    use std::path::PathBuf;

    fn creator(runner: &Arc<ScriptedRunner>) -> CosignAttestationCreator {
        let config = GithubConfig {
            repository: Some("acme/widgets".to_string()),
            api_url: "http://127.0.0.1:9".to_string(),
            ..GithubConfig::default()
        };
        let client = GithubClient::new(
            &config,
            SecretString::new("ghp_test".into()),
            RetryManager::new(RetryOptions::immediate(1)),
        )
        .unwrap();
        CosignAttestationCreator::new(runner.clone(), Arc::new(client), BuildEnvironment::default())
    }

    fn request() -> AttestationRequest {
        AttestationRequest {
            package_name: "@acme/widgets".to_string(),
            version: "1.0.0".to_string(),
            directory: std::env::temp_dir(),
            dry_run: false,
            package_manager: PackageManager::Npm,
            digest: Some("sha256:abcd".to_string()),
            tarball_path: Some(PathBuf::from("/tmp/acme-widgets-1.0.0.tgz")),
        }
    }

    #[test]
    fn test_npm_purl() {
        assert_eq!(npm_purl("@acme/widgets", "1.0.0"), "pkg:npm/%40acme/widgets@1.0.0");
        assert_eq!(npm_purl("widgets", "2.1.0"), "pkg:npm/widgets@2.1.0");
    }

    #[test]
    fn test_predicate_binds_digest() {
        let build = BuildEnvironment::from_env(&HashMap::from([
            ("GITHUB_REPOSITORY".to_string(), "acme/widgets".to_string()),
            ("GITHUB_SHA".to_string(), "deadbeef".to_string()),
        ]));
        let value = predicate(&request(), "abcd", &build);

        assert_eq!(value["buildDefinition"]["externalParameters"]["digest"]["sha256"], "abcd");
        assert_eq!(
            value["buildDefinition"]["externalParameters"]["package"],
            "pkg:npm/%40acme/widgets@1.0.0"
        );
        assert_eq!(
            value["buildDefinition"]["resolvedDependencies"][0]["uri"],
            "git+https://github.com/acme/widgets"
        );
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let runner = Arc::new(ScriptedRunner::new());
        let result = creator(&runner)
            .create(&AttestationRequest {
                dry_run: true,
                ..request()
            })
            .await;

        assert!(result.success);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_digest_is_soft_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        let result = creator(&runner)
            .create(&AttestationRequest {
                digest: None,
                ..request()
            })
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("digest"));
    }

    #[tokio::test]
    async fn test_cosign_failure_is_soft() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("cosign attest-blob", CommandOutput::failed(1, "no identity token"));

        let result = creator(&runner).create(&request()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("no identity token"));
    }

    #[tokio::test]
    async fn test_upload_failure_is_soft() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_with("cosign attest-blob", |call| {
            std::fs::write(call.arg_after("--bundle").unwrap(), r#"{"mediaType": "bundle"}"#).unwrap();
            Ok(CommandOutput::ok(""))
        });

        let result = creator(&runner).create(&request()).await;

        assert!(!result.success);
        let call = &runner.calls()[0];
        assert_eq!(call.arg_after("--type"), Some("slsaprovenance1"));
        assert_eq!(call.args.last().map(String::as_str), Some("/tmp/acme-widgets-1.0.0.tgz"));
    }
}
