//! Release detection
//!
//! Works out which packages and versions a run should publish, and where
//! they live in the workspace.

pub mod changeset;
pub mod detection;
pub mod diff;
pub mod git;
pub mod tags;
pub mod workspace;

pub use changeset::ChangesetStatusReader;
pub use detection::{
    BumpType, ChangesetEntry, ChangesetRelease, ChangesetSource, ChangesetStatus,
    PreDetectedRelease, ReleaseDetector,
};
pub use diff::detect_releases_from_diff;
pub use git::{CliGit, GitOps};
pub use tags::{TagStrategy, tag_name};
pub use workspace::WorkspacePackages;
