//! Error handling for release publishing
//!
//! This module provides the typed errors raised by the publish pipeline,
//! each carrying the registry or package it concerns plus recovery guidance.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for release publishing operations
#[derive(Error, Debug)]
pub enum PublishError {
    // Manifest errors
    #[error("[{package}] package.json not found in {}", directory.display())]
    ManifestNotFound { package: String, directory: PathBuf },

    #[error("[{package}] package.json could not be parsed: {message}")]
    ManifestInvalid { package: String, message: String },

    #[error("[{package}] package.json is missing a name or version")]
    MissingMetadata { package: String },

    // Registry errors
    #[error("[{registry}] registry query failed: {message}")]
    RegistryProbeFailed { registry: String, message: String },

    #[error("[{registry}] Content mismatch: local={local}, remote={remote}")]
    ContentMismatch {
        registry: String,
        local: String,
        remote: String,
    },

    #[error("[{registry}] Failed to pack {}", directory.display())]
    PackFailed { registry: String, directory: PathBuf },

    #[error("[{registry}] publish failed: {message}")]
    PublishFailed { registry: String, message: String },

    // Batch-level errors
    #[error("Build failed: {message}")]
    BuildFailed {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("Pre-validation failed for {} target(s): {}", failures.len(), failures.join("; "))]
    PreValidationFailed { failures: Vec<String> },

    #[error("Release detection failed: {message}")]
    ReleaseDetectionFailed { message: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Command execution errors
    #[error("[{registry}] command error: {message}")]
    CommandError { registry: String, message: String },

    // GitHub API errors
    #[error("GitHub API error: {message}")]
    GithubApi { status: Option<u16>, message: String },
}

impl PublishError {
    /// Get the registry or package name associated with this error, if any
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::ManifestNotFound { package, .. }
            | Self::ManifestInvalid { package, .. }
            | Self::MissingMetadata { package } => Some(package),
            Self::RegistryProbeFailed { registry, .. }
            | Self::ContentMismatch { registry, .. }
            | Self::PackFailed { registry, .. }
            | Self::PublishFailed { registry, .. }
            | Self::CommandError { registry, .. } => Some(registry),
            Self::BuildFailed { .. }
            | Self::PreValidationFailed { .. }
            | Self::ReleaseDetectionFailed { .. }
            | Self::ConfigError(_)
            | Self::GithubApi { .. } => None,
        }
    }

    /// Check if a fresh CI run can be expected to get past this error
    ///
    /// Content mismatches and broken manifests need a human; everything else
    /// is either transient or resolved by the idempotent skip logic on retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::ContentMismatch { .. }
                | Self::ManifestNotFound { .. }
                | Self::ManifestInvalid { .. }
                | Self::MissingMetadata { .. }
                | Self::ConfigError(_)
        )
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::ManifestNotFound { .. } => vec![
                "Check the publish directory of the target",
                "Make sure the build step produces package.json in that directory",
            ],
            Self::ManifestInvalid { .. } => vec!["Fix the JSON syntax of package.json"],
            Self::MissingMetadata { .. } => {
                vec!["Add both \"name\" and \"version\" to package.json"]
            }
            Self::RegistryProbeFailed { .. } => vec![
                "Check the registry token environment variable",
                "Check network access to the registry",
                "Re-run the workflow once the registry is reachable",
            ],
            Self::ContentMismatch { .. } => vec![
                "A different tarball is already published under this version",
                "Bump the version with a new changeset and release again",
            ],
            Self::PackFailed { .. } => vec![
                "Run the pack command locally in the target directory",
                "Check that the build produced the target directory",
            ],
            Self::PublishFailed { .. } => vec![
                "Check the publish command output",
                "Re-run the workflow; already published targets are skipped",
            ],
            Self::BuildFailed { .. } => vec![
                "Check the build output",
                "Run the build script locally",
            ],
            Self::PreValidationFailed { .. } => vec![
                "Nothing was published",
                "Fix every listed target and re-run the workflow",
            ],
            Self::ReleaseDetectionFailed { .. } => vec![
                "Check that the changeset CLI is installed",
                "Make sure the target branch was fetched",
            ],
            Self::ConfigError(_) => vec!["Check .release-config.yaml"],
            Self::CommandError { .. } => vec![
                "Check the command output",
                "Make sure the package manager is installed",
            ],
            Self::GithubApi { .. } => vec![
                "Check the GitHub token permissions",
                "Re-run the workflow later",
            ],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManifestNotFound { .. } => "MANIFEST_NOT_FOUND",
            Self::ManifestInvalid { .. } => "MANIFEST_INVALID",
            Self::MissingMetadata { .. } => "MISSING_METADATA",
            Self::RegistryProbeFailed { .. } => "REGISTRY_PROBE_FAILED",
            Self::ContentMismatch { .. } => "CONTENT_MISMATCH",
            Self::PackFailed { .. } => "PACK_FAILED",
            Self::PublishFailed { .. } => "PUBLISH_FAILED",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::PreValidationFailed { .. } => "PRE_VALIDATION_FAILED",
            Self::ReleaseDetectionFailed { .. } => "RELEASE_DETECTION_FAILED",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::CommandError { .. } => "COMMAND_ERROR",
            Self::GithubApi { .. } => "GITHUB_API_ERROR",
        }
    }
}
