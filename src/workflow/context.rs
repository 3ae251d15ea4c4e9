//! CI trigger context
//!
//! Everything the phase decision looks at, gathered from the GitHub Actions
//! environment and event payload. Associated pull requests need an API call
//! and are attached by the caller.

use crate::core::config::PipelineConfig;
use crate::core::error::PublishError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// The pull request an event is about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestEvent {
    pub number: u64,
    pub action: String,
    pub merged: bool,
    pub head_ref: String,
    pub base_ref: String,
    #[serde(default)]
    pub body: String,
}

/// A pull request whose merge produced the pushed commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedPullRequest {
    pub number: u64,
    pub head_ref: String,
    pub base_ref: String,
    pub merged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub event_name: String,
    pub ref_name: String,
    pub sha: String,
    pub default_branch: String,
    pub target_branch: String,
    pub release_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestEvent>,
    #[serde(default)]
    pub associated_pull_requests: Vec<AssociatedPullRequest>,
    #[serde(default)]
    pub has_pending_changesets: bool,
}

#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    pull_request: Option<PullRequestPayload>,
    #[serde(default)]
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    number: u64,
    #[serde(default)]
    merged: bool,
    head: BranchPayload,
    base: BranchPayload,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    #[serde(default)]
    default_branch: Option<String>,
}

impl WorkflowContext {
    /// Build the context from `GITHUB_*` variables and the event JSON
    ///
    /// `event_json` is the content of the file `GITHUB_EVENT_PATH` points to.
    pub fn from_github_env(
        env: &HashMap<String, String>,
        event_json: &str,
        config: &PipelineConfig,
    ) -> Result<Self, PublishError> {
        let var = |name: &str| env.get(name).cloned().unwrap_or_default();

        let event_name = var("GITHUB_EVENT_NAME");
        if event_name.is_empty() {
            return Err(PublishError::ConfigError(
                "GITHUB_EVENT_NAME is not set".to_string(),
            ));
        }

        let payload: EventPayload = if event_json.trim().is_empty() {
            EventPayload::default()
        } else {
            serde_json::from_str(event_json)
                .map_err(|e| PublishError::ConfigError(format!("invalid event payload: {}", e)))?
        };

        let default_branch = payload
            .repository
            .and_then(|r| r.default_branch)
            .unwrap_or_else(|| config.default_branch().to_string());

        let pull_request = payload.pull_request.map(|pr| PullRequestEvent {
            number: pr.number,
            action: payload.action.clone().unwrap_or_default(),
            merged: pr.merged,
            head_ref: pr.head.name,
            base_ref: pr.base.name,
            body: pr.body.unwrap_or_default(),
        });

        Ok(Self {
            event_name,
            ref_name: var("GITHUB_REF_NAME"),
            sha: var("GITHUB_SHA"),
            default_branch,
            target_branch: config.target_branch.clone(),
            release_branch: config.release_branch(),
            pull_request,
            associated_pull_requests: Vec::new(),
            has_pending_changesets: false,
        })
    }

    pub fn with_associated_pull_requests(mut self, pulls: Vec<AssociatedPullRequest>) -> Self {
        self.associated_pull_requests = pulls;
        self
    }

    pub fn with_pending_changesets(mut self, pending: bool) -> Self {
        self.has_pending_changesets = pending;
        self
    }
}

/// Whether `.changeset/` holds any changeset file besides its README
pub async fn has_pending_changesets(repo_root: &Path) -> std::io::Result<bool> {
    let mut entries = match tokio::fs::read_dir(repo_root.join(".changeset")).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".md") && !name.eq_ignore_ascii_case("README.md") {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_pull_request_event() {
        let event = r#"{
            "action": "closed",
            "pull_request": {
                "number": 42,
                "merged": true,
                "head": {"ref": "feature/x"},
                "base": {"ref": "develop"},
                "body": "Fixes #7"
            },
            "repository": {"default_branch": "trunk"}
        }"#;

        let context = WorkflowContext::from_github_env(
            &env(&[("GITHUB_EVENT_NAME", "pull_request"), ("GITHUB_SHA", "abc")]),
            event,
            &PipelineConfig::default(),
        )
        .unwrap();

        let pr = context.pull_request.unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.action, "closed");
        assert!(pr.merged);
        assert_eq!(pr.base_ref, "develop");
        assert_eq!(context.default_branch, "trunk");
        assert_eq!(context.release_branch, "changeset-release/main");
    }

    #[test]
    fn test_push_event_without_payload() {
        let context = WorkflowContext::from_github_env(
            &env(&[
                ("GITHUB_EVENT_NAME", "push"),
                ("GITHUB_REF_NAME", "main"),
                ("GITHUB_SHA", "deadbeef"),
            ]),
            "",
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(context.ref_name, "main");
        assert_eq!(context.sha, "deadbeef");
        assert_eq!(context.default_branch, "main");
        assert!(context.pull_request.is_none());
    }

    #[test]
    fn test_missing_event_name() {
        let error =
            WorkflowContext::from_github_env(&HashMap::new(), "{}", &PipelineConfig::default())
                .unwrap_err();
        assert!(matches!(error, PublishError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_pending_changesets() {
        let temp = TempDir::new().unwrap();
        assert!(!has_pending_changesets(temp.path()).await.unwrap());

        let dir = temp.path().join(".changeset");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("README.md"), "docs").unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();
        assert!(!has_pending_changesets(temp.path()).await.unwrap());

        std::fs::write(dir.join("brave-cats-dance.md"), "---\n'a': patch\n---\n").unwrap();
        assert!(has_pending_changesets(temp.path()).await.unwrap());
    }
}
