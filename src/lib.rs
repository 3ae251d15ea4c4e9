pub mod core;
pub mod github;
pub mod orchestration;
pub mod plugins;
pub mod registry;
pub mod release;
pub mod security;
pub mod targets;
pub mod validation;
pub mod workflow;

#[doc(hidden)]
pub mod testing;

pub use crate::core::*;
pub use orchestration::{
    PackagePublishResult, PublishOrchestrator, PublishPackagesResult, TargetPublishResult,
};
pub use release::PreDetectedRelease;
pub use security::{CommandError, NpmrcAuthenticator, SafeCommandExecutor, SecureTokenManager};
pub use targets::{PackageTargets, ResolvedTarget};
pub use workflow::{WorkflowContext, WorkflowPhase, detect_phase};
