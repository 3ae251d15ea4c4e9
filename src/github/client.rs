//! GitHub REST client
//!
//! Only the two calls the pipeline needs: pull requests for a commit (phase
//! detection) and attestation upload (supplementary provenance).

use crate::core::config::GithubConfig;
use crate::core::error::PublishError;
use crate::core::retry::RetryManager;
use crate::workflow::AssociatedPullRequest;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("release-publisher/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct PullPayload {
    number: u64,
    #[serde(default)]
    merged_at: Option<String>,
    head: RefPayload,
    base: RefPayload,
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct AttestationCreated {
    id: u64,
}

/// 5xx, 429 and transport failures are worth another attempt
pub fn is_retryable(error: &PublishError) -> bool {
    match error {
        PublishError::GithubApi { status: None, .. } => true,
        PublishError::GithubApi {
            status: Some(status),
            ..
        } => *status == 429 || *status >= 500,
        _ => false,
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: SecretString,
    retry: RetryManager,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(
        config: &GithubConfig,
        token: SecretString,
        retry: RetryManager,
    ) -> Result<Self, PublishError> {
        let slug = config.repository.as_deref().ok_or_else(|| {
            PublishError::ConfigError("github.repository is not set".to_string())
        })?;
        let (owner, repo) = slug
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
            .ok_or_else(|| {
                PublishError::ConfigError(format!("invalid repository slug '{}'", slug))
            })?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PublishError::GithubApi {
                status: None,
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
            retry,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, PublishError> {
        let request = &request;
        self.retry
            .retry_if(
                move || async move {
                    let response = request()
                        .bearer_auth(self.token.expose_secret())
                        .header("Accept", "application/vnd.github+json")
                        .header("X-GitHub-Api-Version", API_VERSION)
                        .send()
                        .await
                        .map_err(|e| PublishError::GithubApi {
                            status: None,
                            message: e.to_string(),
                        })?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(api_error(status, &body));
                    }

                    response.json::<T>().await.map_err(|e| PublishError::GithubApi {
                        status: Some(status.as_u16()),
                        message: format!("unexpected response: {}", e),
                    })
                },
                is_retryable,
            )
            .await
    }

    /// Pull requests that contain `sha`, merged or not
    pub async fn pulls_for_commit(&self, sha: &str) -> Result<Vec<AssociatedPullRequest>, PublishError> {
        let url = self.repo_url(&format!("commits/{}/pulls", sha));
        let pulls: Vec<PullPayload> = self.send(|| self.http.get(&url)).await?;

        tracing::debug!(sha, count = pulls.len(), "pull requests for commit");
        Ok(pulls
            .into_iter()
            .map(|pr| AssociatedPullRequest {
                number: pr.number,
                merged: pr.merged_at.is_some(),
                head_ref: pr.head.name,
                base_ref: pr.base.name,
            })
            .collect())
    }

    /// Store a sigstore bundle, returning the attestation id
    pub async fn upload_attestation(&self, bundle: &serde_json::Value) -> Result<u64, PublishError> {
        let url = self.repo_url("attestations");
        let body = serde_json::json!({ "bundle": bundle });
        let created: AttestationCreated = self.send(|| self.http.post(&url).json(&body)).await?;
        Ok(created.id)
    }

    /// Browser URL of an uploaded attestation
    pub fn attestation_url(&self, id: u64) -> String {
        format!(
            "https://github.com/{}/{}/attestations/{}",
            self.owner, self.repo, id
        )
    }
}

fn api_error(status: StatusCode, body: &str) -> PublishError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());

    PublishError::GithubApi {
        status: Some(status.as_u16()),
        message: format!("{}: {}", status, message),
    }
}
