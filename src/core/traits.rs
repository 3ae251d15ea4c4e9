//! Core traits and types for the publish pipeline
//!
//! This module defines the seams the pipeline talks through: command
//! execution, registry authentication and build attestation. Each has a
//! production implementation elsewhere in the crate and a fake in tests.

use crate::core::package_manager::PackageManager;
use crate::security::CommandError;
use crate::targets::ResolvedTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Command Execution
// ============================================================================

/// Captured result of one subprocess invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for pattern matching over tool output
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (_, true) => self.stdout.clone(),
            _ => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Narrow exec interface every shell-out in the pipeline goes through
///
/// A non-zero exit code is reported in [`CommandOutput`], not as an error.
/// Errors are reserved for commands that could not run at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, CommandError>;
}

// ============================================================================
// Registry Authentication
// ============================================================================

/// A registry whose credential variable is not set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingToken {
    pub registry: String,
    pub token_env: String,
}

/// Result of configuring credentials for a set of targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSetupResult {
    pub success: bool,
    pub configured_registries: Vec<String>,
    pub missing_tokens: Vec<MissingToken>,
}

/// Writes or exports registry credentials for every resolved target
#[async_trait]
pub trait RegistryAuth: Send + Sync {
    async fn configure(&self, targets: &[ResolvedTarget]) -> anyhow::Result<AuthSetupResult>;
}

// ============================================================================
// Attestation
// ============================================================================

/// Everything needed to attest one published package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRequest {
    pub package_name: String,
    pub version: String,
    pub directory: PathBuf,
    pub dry_run: bool,
    pub package_manager: PackageManager,
    /// `sha256:<hex>` digest of the published tarball
    pub digest: Option<String>,
    pub tarball_path: Option<PathBuf>,
}

/// Result of an attestation attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Creates a build-provenance attestation bound to a tarball digest
///
/// Implementations never fail the publish: every problem is reported as
/// `success: false` in the result.
#[async_trait]
pub trait AttestationCreator: Send + Sync {
    async fn create(&self, request: &AttestationRequest) -> AttestationResult;
}
