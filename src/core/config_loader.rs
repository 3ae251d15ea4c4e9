//! Configuration file loader for release-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PublishError;
use crate::core::package_manager::PackageManager;
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".release-config.yaml";

/// Overrides coming from the command line (highest priority)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub package_manager: Option<PackageManager>,
    pub target_branch: Option<String>,
    pub dry_run: Option<bool>,
    pub strict_integrity: Option<bool>,
}

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Repository root to load config from
    pub project_path: PathBuf,

    /// Explicit config file, replaces the project file lookup
    pub config_file: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub overrides: ConfigOverrides,

    /// Environment variables
    pub env: HashMap<String, String>,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    /// Is configuration valid?
    pub valid: bool,

    /// Validation errors
    pub errors: Vec<ConfigValidationError>,

    /// Validation warnings
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "integrity.alreadyPublishedPatterns[0]")
    pub field: String,

    /// Error message
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    /// Field path
    pub field: String,

    /// Warning message
    pub message: String,

    /// Suggestion
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Project config (./.release-config.yaml, following `extends`)
    /// 4. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PipelineConfig, PublishError> {
        let file_path = options
            .config_file
            .clone()
            .unwrap_or_else(|| options.project_path.join(CONFIG_FILENAME));

        let mut config = match Self::load_config_file(&file_path).await? {
            Some(value) => serde_yaml::from_value::<PipelineConfig>(value).map_err(|e| {
                PublishError::ConfigError(format!(
                    "Failed to parse {}: {}",
                    file_path.display(),
                    e
                ))
            })?,
            None => {
                if options.config_file.is_some() {
                    return Err(PublishError::ConfigError(format!(
                        "Config file not found: {}",
                        file_path.display()
                    )));
                }
                PipelineConfig::default()
            }
        };

        Self::apply_env(&mut config, &options.env)?;
        Self::apply_overrides(&mut config, options.overrides);

        Ok(config)
    }

    /// Load a YAML file as a raw value, merging in the file it extends
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<Value>, PublishError>> + Send + '_>,
    > {
        Box::pin(async move {
            if !file_path.exists() {
                return Ok(None);
            }

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PublishError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let value: Value = serde_yaml::from_str(&content).map_err(|e| {
                PublishError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?;

            let extends = value
                .get("extends")
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(extends_path) = extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| {
                        PublishError::ConfigError("Invalid config file path".to_string())
                    })?
                    .join(extends_path);

                match Self::load_config_file(&base_path).await? {
                    Some(base) => return Ok(Some(Self::merge_values(base, value))),
                    None => {
                        return Err(PublishError::ConfigError(format!(
                            "Extended config not found: {}",
                            base_path.display()
                        )));
                    }
                }
            }

            Ok(Some(value))
        })
    }

    /// Deep-merge two YAML values; mappings merge key by key, anything else
    /// from `overlay` replaces `base`
    fn merge_values(base: Value, overlay: Value) -> Value {
        match (base, overlay) {
            (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
                for (key, overlay_value) in overlay_map {
                    let merged = match base_map.remove(&key) {
                        Some(base_value) => Self::merge_values(base_value, overlay_value),
                        None => overlay_value,
                    };
                    base_map.insert(key, merged);
                }
                Value::Mapping(base_map)
            }
            (_, overlay) => overlay,
        }
    }

    /// Apply environment variable overrides
    fn apply_env(
        config: &mut PipelineConfig,
        env: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        if let Some(pm) = env.get("RELEASE_PACKAGE_MANAGER") {
            config.package_manager = pm.parse().map_err(PublishError::ConfigError)?;
        }

        if let Some(branch) = env.get("RELEASE_TARGET_BRANCH") {
            config.target_branch = branch.clone();
        }

        if let Some(dry_run) = env.get("RELEASE_DRY_RUN") {
            config.dry_run = Self::parse_bool(dry_run);
        }

        if let Some(strict) = env.get("RELEASE_STRICT_INTEGRITY") {
            config.integrity.strict = Self::parse_bool(strict);
        }

        if config.github.repository.is_none()
            && let Some(repository) = env.get("GITHUB_REPOSITORY")
        {
            config.github.repository = Some(repository.clone());
        }

        if let Some(api_url) = env.get("GITHUB_API_URL") {
            config.github.api_url = api_url.clone();
        }

        Ok(())
    }

    fn apply_overrides(config: &mut PipelineConfig, overrides: ConfigOverrides) {
        if let Some(pm) = overrides.package_manager {
            config.package_manager = pm;
        }
        if let Some(branch) = overrides.target_branch {
            config.target_branch = branch;
        }
        if let Some(dry_run) = overrides.dry_run {
            config.dry_run = dry_run;
        }
        if let Some(strict) = overrides.strict_integrity {
            config.integrity.strict = strict;
        }
    }

    fn parse_bool(value: &str) -> bool {
        matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
    }

    /// Validate configuration
    pub fn validate(config: &PipelineConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if config.target_branch.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "targetBranch".to_string(),
                message: "targetBranch must not be empty".to_string(),
            });
        }

        if config.release_branch() == config.target_branch {
            errors.push(ConfigValidationError {
                field: "releaseBranch".to_string(),
                message: "releaseBranch must differ from targetBranch".to_string(),
            });
        }

        if config.build.enabled && config.build.script.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "build.script".to_string(),
                message: "build.script is required when the build is enabled".to_string(),
            });
        }

        if config.retry.max_attempts == 0 {
            errors.push(ConfigValidationError {
                field: "retry.maxAttempts".to_string(),
                message: "maxAttempts must be at least 1".to_string(),
            });
        }

        if config.github.repository.is_some() && config.repository().is_none() {
            errors.push(ConfigValidationError {
                field: "github.repository".to_string(),
                message: "repository must look like \"owner/repo\"".to_string(),
            });
        }

        let tables = [
            (
                "integrity.alreadyPublishedPatterns",
                &config.integrity.already_published_patterns,
            ),
            (
                "integrity.jsrAlreadyPublishedPatterns",
                &config.integrity.jsr_already_published_patterns,
            ),
        ];
        for (field, patterns) in tables {
            if patterns.is_empty() {
                warnings.push(ConfigValidationWarning {
                    field: field.to_string(),
                    message: "no already-published patterns configured".to_string(),
                    suggestion: Some(
                        "Publish races will be reported as plain failures".to_string(),
                    ),
                });
            }
            for (i, pattern) in patterns.iter().enumerate() {
                if pattern.trim().is_empty() {
                    errors.push(ConfigValidationError {
                        field: format!("{}[{}]", field, i),
                        message: "pattern must not be empty".to_string(),
                    });
                }
            }
        }

        if config.integrity.strict {
            warnings.push(ConfigValidationWarning {
                field: "integrity.strict".to_string(),
                message: "targets whose digests cannot be compared will block the release"
                    .to_string(),
                suggestion: None,
            });
        }

        if config.attestation.enabled && config.repository().is_none() {
            warnings.push(ConfigValidationWarning {
                field: "attestation.enabled".to_string(),
                message: "attestations need github.repository".to_string(),
                suggestion: Some("Set GITHUB_REPOSITORY or github.repository".to_string()),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("Configuration validation succeeded".to_string());
        } else {
            lines.push("Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\nErrors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\nWarnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}
