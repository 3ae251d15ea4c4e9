//! Workflow phase selection
//!
//! Decides which part of the release workflow a CI trigger runs.

pub mod context;
pub mod phase;

pub use context::{AssociatedPullRequest, PullRequestEvent, WorkflowContext, has_pending_changesets};
pub use phase::{WorkflowPhase, closing_issue_refs, detect_phase};
