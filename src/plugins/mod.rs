//! Target publishers
//!
//! One plugin per registry protocol. [`TargetPublisher`] dispatches a
//! resolved target to the plugin for its protocol.

pub mod jsr_plugin;
pub mod npm_plugin;

pub use jsr_plugin::JsrPlugin;
pub use npm_plugin::NpmPlugin;

use crate::core::config::IntegrityConfig;
use crate::core::package_manager::PackageManager;
use crate::registry::{IntegrityComparison, PrePackedTarball};
use crate::targets::{Protocol, ResolvedTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Why a target counted as already published
pub type AlreadyPublishedReason = IntegrityComparison;

/// Outcome of one publish attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    /// Provenance URL reported by the registry tool itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_url: Option<String>,
    #[serde(default)]
    pub already_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_published_reason: Option<AlreadyPublishedReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_integrity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_integrity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tarball_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tarball_digest: Option<String>,
}

impl PublishResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Synthetic success for dry runs
    pub fn dry_run(target: &ResolvedTarget) -> Self {
        Self {
            success: true,
            output: format!("[dry-run] would publish to {}", target.registry_key()),
            ..Default::default()
        }
    }
}

/// Per-call publish settings
#[derive(Debug, Clone, Copy)]
pub struct PublishContext<'a> {
    pub dry_run: bool,
    pub package_manager: PackageManager,
    /// Tarball packed once for the target's directory
    pub tarball: Option<&'a PrePackedTarball>,
}

/// Output patterns meaning "this version already exists"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyPublishedPatterns {
    npm: Vec<String>,
    jsr: Vec<String>,
}

impl Default for AlreadyPublishedPatterns {
    fn default() -> Self {
        Self::from(&IntegrityConfig::default())
    }
}

impl From<&IntegrityConfig> for AlreadyPublishedPatterns {
    fn from(config: &IntegrityConfig) -> Self {
        let lower = |patterns: &[String]| -> Vec<String> {
            patterns
                .iter()
                .filter(|p| !p.trim().is_empty())
                .map(|p| p.to_lowercase())
                .collect()
        };
        Self {
            npm: lower(&config.already_published_patterns),
            jsr: lower(&config.jsr_already_published_patterns),
        }
    }
}

impl AlreadyPublishedPatterns {
    /// Case-insensitive match of tool output against the table for `protocol`
    pub fn matches(&self, protocol: Protocol, output: &str) -> bool {
        let table = match protocol {
            Protocol::Npm => &self.npm,
            Protocol::Jsr => &self.jsr,
        };
        let output = output.to_lowercase();
        table.iter().any(|pattern| output.contains(pattern))
    }
}

/// Publisher for one registry protocol
#[async_trait]
pub trait TargetPlugin: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Publish one target; every failure is reported in the result
    async fn publish(&self, target: &ResolvedTarget, context: &PublishContext<'_>) -> PublishResult;
}

/// Dispatches targets to the plugin for their protocol
pub struct TargetPublisher {
    plugins: Vec<Box<dyn TargetPlugin>>,
}

impl TargetPublisher {
    pub fn new(plugins: Vec<Box<dyn TargetPlugin>>) -> Self {
        Self { plugins }
    }

    pub async fn publish_to_target(
        &self,
        target: &ResolvedTarget,
        context: &PublishContext<'_>,
    ) -> PublishResult {
        if context.dry_run {
            tracing::info!(registry = target.registry_key(), "dry run, not publishing");
            return PublishResult::dry_run(target);
        }

        match self.plugins.iter().find(|p| p.protocol() == target.protocol) {
            Some(plugin) => plugin.publish(target, context).await,
            None => PublishResult::failure(format!(
                "No publisher for protocol {:?}",
                target.protocol
            )),
        }
    }
}
