//! Orchestration layer for release publishing
//!
//! This module drives a whole release run across every package and
//! registry target in the batch.

pub mod publish_orchestrator;

// Re-export main types for convenience
pub use publish_orchestrator::{
    PackagePublishResult, PublishOrchestrator, PublishPackagesResult, TargetPublishResult,
};
