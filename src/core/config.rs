//! Configuration structures and types for release-publisher
//!
//! This module provides type-safe configuration management with serde support.

use crate::core::package_manager::PackageManager;
use crate::core::retry::RetryOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Package manager used for build, pack, publish and view
    pub package_manager: PackageManager,

    /// Branch releases are merged into
    pub target_branch: String,

    /// Repository default branch (default: same as targetBranch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,

    /// Long-lived release branch (default: changeset-release/<targetBranch>)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_branch: Option<String>,

    /// Run everything except registry-mutating commands
    pub dry_run: bool,

    /// Build step settings
    pub build: BuildConfig,

    /// Content-integrity policy
    pub integrity: IntegrityConfig,

    /// Supplementary attestation settings
    pub attestation: AttestationConfig,

    /// GitHub repository settings
    pub github: GithubConfig,

    /// Retry settings for registry queries and GitHub API calls
    pub retry: RetryConfig,

    /// npmrc file registry credentials are written to (default: ~/.npmrc)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npmrc_path: Option<PathBuf>,
}

/// Build step configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    /// Run the build script before pre-validation (default: true)
    pub enabled: bool,

    /// Script name passed to `<pm> run` (default: "build")
    pub script: String,
}

/// Content-integrity policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrityConfig {
    /// Treat "cannot compare digests" as an error instead of a safe skip
    pub strict: bool,

    /// Output patterns meaning "this version is already on the registry"
    pub already_published_patterns: Vec<String>,

    /// Same for JSR publish output
    pub jsr_already_published_patterns: Vec<String>,
}

/// Supplementary attestation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AttestationConfig {
    /// Create an attestation for packages without npm-native provenance
    pub enabled: bool,
}

/// GitHub configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GithubConfig {
    /// Repository slug, "owner/repo"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// REST API base URL
    pub api_url: String,

    /// Environment variable holding the API token
    pub token_env: String,
}

/// Retry configuration in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

/// Default configuration values
impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extends: None,
            package_manager: PackageManager::Npm,
            target_branch: "main".to_string(),
            default_branch: None,
            release_branch: None,
            dry_run: false,
            build: BuildConfig::default(),
            integrity: IntegrityConfig::default(),
            attestation: AttestationConfig::default(),
            github: GithubConfig::default(),
            retry: RetryConfig::default(),
            npmrc_path: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script: "build".to_string(),
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            strict: false,
            already_published_patterns: vec![
                "cannot publish over previously published version".to_string(),
                "You cannot publish over the previously published versions".to_string(),
                "EPUBLISHCONFLICT".to_string(),
            ],
            jsr_already_published_patterns: vec![
                "already exists".to_string(),
                "already published".to_string(),
            ],
        }
    }
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repository: None,
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_ms: 250,
        }
    }
}

impl PipelineConfig {
    pub fn default_branch(&self) -> &str {
        self.default_branch.as_deref().unwrap_or(&self.target_branch)
    }

    pub fn release_branch(&self) -> String {
        self.release_branch
            .clone()
            .unwrap_or_else(|| format!("changeset-release/{}", self.target_branch))
    }

    /// Split the configured repository slug into owner and name
    pub fn repository(&self) -> Option<(&str, &str)> {
        let slug = self.github.repository.as_deref()?;
        let (owner, name) = slug.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.package_manager, PackageManager::Npm);
        assert_eq!(config.target_branch, "main");
        assert_eq!(config.default_branch(), "main");
        assert_eq!(config.release_branch(), "changeset-release/main");
        assert!(config.build.enabled);
        assert!(!config.integrity.strict);
        assert_eq!(config.integrity.already_published_patterns.len(), 3);
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = r#"
packageManager: pnpm
targetBranch: develop
integrity:
  strict: true
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.package_manager, PackageManager::Pnpm);
        assert_eq!(config.target_branch, "develop");
        assert!(config.integrity.strict);
        // Unspecified nested fields keep their defaults
        assert!(!config.integrity.already_published_patterns.is_empty());
        assert_eq!(config.release_branch(), "changeset-release/develop");
    }

    #[test]
    fn test_serialize_config() {
        let config = PipelineConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("packageManager: npm"));
        assert!(yaml.contains("targetBranch: main"));
    }

    #[test]
    fn test_repository_slug() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.repository(), None);

        config.github.repository = Some("acme/widgets".to_string());
        assert_eq!(config.repository(), Some(("acme", "widgets")));

        config.github.repository = Some("acme/".to_string());
        assert_eq!(config.repository(), None);
    }

    #[test]
    fn test_retry_options_from_config() {
        let options = RetryOptions::from(&RetryConfig::default());
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.initial_delay, Duration::from_secs(1));
        assert_eq!(options.max_delay, Duration::from_secs(10));
        assert_eq!(options.jitter, Duration::from_millis(250));
    }
}
