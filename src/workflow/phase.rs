//! Workflow Phase State Machine
//!
//! Classifies a CI trigger into the one phase the run should execute. Rules
//! are checked in order and the first match wins.

use crate::workflow::context::{PullRequestEvent, WorkflowContext};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CLOSING_KEYWORD: Regex =
        Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s*:?\s+#(\d+)\b").unwrap();
}

const VALIDATION_ACTIONS: &[&str] = &["opened", "synchronize", "reopened", "edited"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum WorkflowPhase {
    /// Create or update the release branch from pending changesets
    BranchManagement,
    /// Check the release pull request can be published
    #[serde(rename_all = "camelCase")]
    Validation { pull_request: u64 },
    /// Publish what the merged release pull request versioned
    #[serde(rename_all = "camelCase")]
    Publishing { pull_request: u64, sha: String },
    /// Close issues GitHub will not auto-close outside the default branch
    #[serde(rename_all = "camelCase")]
    CloseIssues { pull_request: u64, issues: Vec<u64> },
    None { reason: String },
}

/// Issue numbers referenced with a closing keyword, in order of appearance
pub fn closing_issue_refs(body: &str) -> Vec<u64> {
    let mut issues = Vec::new();
    for captures in CLOSING_KEYWORD.captures_iter(body) {
        if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse().ok()) {
            if !issues.contains(&number) {
                issues.push(number);
            }
        }
    }
    issues
}

fn is_release_pull_request(context: &WorkflowContext, pr: &PullRequestEvent) -> bool {
    pr.head_ref == context.release_branch && pr.base_ref == context.target_branch
}

pub fn detect_phase(context: &WorkflowContext) -> WorkflowPhase {
    let push_to_target = context.event_name == "push" && context.ref_name == context.target_branch;

    if push_to_target {
        let merged_release = context.associated_pull_requests.iter().find(|pr| {
            pr.merged && pr.head_ref == context.release_branch && pr.base_ref == context.target_branch
        });
        if let Some(pr) = merged_release {
            tracing::info!(pull_request = pr.number, sha = %context.sha, "release pull request merged");
            return WorkflowPhase::Publishing {
                pull_request: pr.number,
                sha: context.sha.clone(),
            };
        }
    }

    if context.event_name == "pull_request" || context.event_name == "pull_request_target" {
        if let Some(pr) = &context.pull_request {
            if VALIDATION_ACTIONS.contains(&pr.action.as_str()) && is_release_pull_request(context, pr) {
                return WorkflowPhase::Validation {
                    pull_request: pr.number,
                };
            }
        }
    }

    if push_to_target && context.has_pending_changesets {
        return WorkflowPhase::BranchManagement;
    }

    if let Some(pr) = &context.pull_request {
        if pr.action == "closed" && pr.merged && pr.base_ref != context.default_branch {
            return WorkflowPhase::CloseIssues {
                pull_request: pr.number,
                issues: closing_issue_refs(&pr.body),
            };
        }
    }

    WorkflowPhase::None {
        reason: match (context.event_name.as_str(), push_to_target) {
            ("push", true) => "push to target branch with no pending changesets".to_string(),
            ("push", false) => format!("push to {} is not the target branch", context.ref_name),
            (event, _) => format!("no phase handles {} on {}", event, context.ref_name),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::AssociatedPullRequest;

    fn push(ref_name: &str) -> WorkflowContext {
        WorkflowContext {
            event_name: "push".to_string(),
            ref_name: ref_name.to_string(),
            sha: "abc123".to_string(),
            default_branch: "main".to_string(),
            target_branch: "main".to_string(),
            release_branch: "changeset-release/main".to_string(),
            ..Default::default()
        }
    }

    fn pull_request(action: &str, head: &str, base: &str, merged: bool, body: &str) -> WorkflowContext {
        WorkflowContext {
            event_name: "pull_request".to_string(),
            ref_name: "42/merge".to_string(),
            pull_request: Some(PullRequestEvent {
                number: 42,
                action: action.to_string(),
                merged,
                head_ref: head.to_string(),
                base_ref: base.to_string(),
                body: body.to_string(),
            }),
            ..push("42/merge")
        }
    }

    #[test]
    fn test_merged_release_pr_publishes() {
        let context = push("main").with_associated_pull_requests(vec![AssociatedPullRequest {
            number: 7,
            head_ref: "changeset-release/main".to_string(),
            base_ref: "main".to_string(),
            merged: true,
        }]);

        assert_eq!(
            detect_phase(&context.with_pending_changesets(true)),
            WorkflowPhase::Publishing {
                pull_request: 7,
                sha: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_release_pr_validation() {
        for action in ["opened", "synchronize", "reopened", "edited"] {
            let context = pull_request(action, "changeset-release/main", "main", false, "");
            assert_eq!(detect_phase(&context), WorkflowPhase::Validation { pull_request: 42 });
        }

        let other = pull_request("opened", "feature/x", "main", false, "");
        assert!(matches!(detect_phase(&other), WorkflowPhase::None { .. }));
    }

    #[test]
    fn test_branch_management_needs_changesets() {
        assert_eq!(
            detect_phase(&push("main").with_pending_changesets(true)),
            WorkflowPhase::BranchManagement
        );
        assert!(matches!(detect_phase(&push("main")), WorkflowPhase::None { .. }));
        assert!(matches!(
            detect_phase(&push("feature/x").with_pending_changesets(true)),
            WorkflowPhase::None { .. }
        ));
    }

    #[test]
    fn test_close_issues_outside_default_branch() {
        let context = pull_request("closed", "feature/x", "develop", true, "Fixes #12, closes #3 and resolved: #12");
        assert_eq!(
            detect_phase(&context),
            WorkflowPhase::CloseIssues {
                pull_request: 42,
                issues: vec![12, 3]
            }
        );

        let on_default = pull_request("closed", "feature/x", "main", true, "Fixes #12");
        assert!(matches!(detect_phase(&on_default), WorkflowPhase::None { .. }));

        let unmerged = pull_request("closed", "feature/x", "develop", false, "Fixes #12");
        assert!(matches!(detect_phase(&unmerged), WorkflowPhase::None { .. }));
    }

    #[test]
    fn test_closing_issue_refs() {
        assert_eq!(closing_issue_refs("close #1 FIXED #2 resolves #3"), vec![1, 2, 3]);
        assert!(closing_issue_refs("see #4, related to #5").is_empty());
        assert!(closing_issue_refs("prefix#6").is_empty());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&WorkflowPhase::Publishing {
            pull_request: 7,
            sha: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"phase":"publishing","pullRequest":7,"sha":"abc"}"#);
    }
}
