//! package.json model
//!
//! Only the fields the pipeline reads are modelled; unknown keys are ignored.

use crate::core::error::PublishError;
use crate::targets::{Access, Protocol};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub private: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_config: Option<ManifestPublishConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspaces: Option<WorkspacesField>,
}

impl PackageManifest {
    /// Name and version, both required for anything registry-facing
    pub fn identity(&self, context: &str) -> Result<(&str, &str), PublishError> {
        match (self.name.as_deref(), self.version.as_deref()) {
            (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
                Ok((name, version))
            }
            _ => Err(PublishError::MissingMetadata {
                package: self.name.clone().unwrap_or_else(|| context.to_string()),
            }),
        }
    }
}

/// `publishConfig` of a package.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPublishConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<bool>,

    /// Multi-target list; absent means legacy single-registry mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<TargetConfig>>,
}

/// One entry of `publishConfig.targets`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetConfig {
    /// `"npm"`, `"github"`, `"jsr"` or a registry URL
    Shorthand(String),
    Full(TargetObject),
}

/// Canonical target declaration every shorthand expands to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetObject {
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

/// `workspaces` as either a plain list or the yarn `{packages: [...]}` form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkspacesField {
    List(Vec<String>),
    Object {
        #[serde(default)]
        packages: Vec<String>,
    },
}

impl WorkspacesField {
    pub fn patterns(&self) -> &[String] {
        match self {
            WorkspacesField::List(patterns) => patterns,
            WorkspacesField::Object { packages } => packages,
        }
    }
}

/// Read and parse `<directory>/package.json`
pub async fn read_manifest(directory: &Path) -> Result<PackageManifest, PublishError> {
    let path = directory.join("package.json");
    let context = directory.display().to_string();

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PublishError::ManifestNotFound {
                package: context,
                directory: directory.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(PublishError::ManifestInvalid {
                package: context,
                message: e.to_string(),
            });
        }
    };

    serde_json::from_str(&content).map_err(|e| PublishError::ManifestInvalid {
        package: context,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_mixed_targets() {
        let json = r#"{
            "name": "@acme/widgets",
            "version": "1.2.0",
            "publishConfig": {
                "access": "public",
                "targets": [
                    "npm",
                    { "registry": "https://npm.pkg.github.com/", "directory": "dist/github" },
                    { "protocol": "jsr" }
                ]
            }
        }"#;

        let manifest: PackageManifest = serde_json::from_str(json).unwrap();
        let config = manifest.publish_config.unwrap();
        let targets = config.targets.unwrap();

        assert_eq!(config.access, Some(Access::Public));
        assert_eq!(targets[0], TargetConfig::Shorthand("npm".to_string()));
        match &targets[1] {
            TargetConfig::Full(object) => {
                assert_eq!(object.protocol, Protocol::Npm);
                assert_eq!(object.directory.as_deref(), Some("dist/github"));
            }
            other => panic!("expected full target, got {:?}", other),
        }
        match &targets[2] {
            TargetConfig::Full(object) => assert_eq!(object.protocol, Protocol::Jsr),
            other => panic!("expected full target, got {:?}", other),
        }
    }

    #[test]
    fn test_workspaces_forms() {
        let list: PackageManifest =
            serde_json::from_str(r#"{"workspaces": ["packages/*"]}"#).unwrap();
        assert_eq!(list.workspaces.unwrap().patterns(), ["packages/*"]);

        let object: PackageManifest =
            serde_json::from_str(r#"{"workspaces": {"packages": ["apps/*"]}}"#).unwrap();
        assert_eq!(object.workspaces.unwrap().patterns(), ["apps/*"]);
    }

    #[test]
    fn test_identity_requires_name_and_version() {
        let manifest = PackageManifest {
            name: Some("pkg".to_string()),
            ..Default::default()
        };
        let error = manifest.identity("/repo/pkg").unwrap_err();
        assert!(matches!(error, PublishError::MissingMetadata { ref package } if package == "pkg"));

        let manifest = PackageManifest {
            name: Some("pkg".to_string()),
            version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        assert_eq!(manifest.identity("/repo/pkg").unwrap(), ("pkg", "1.0.0"));
    }

    #[tokio::test]
    async fn test_read_manifest_missing() {
        let dir = TempDir::new().unwrap();
        let error = read_manifest(dir.path()).await.unwrap_err();
        assert!(matches!(error, PublishError::ManifestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_read_manifest_invalid_json() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("package.json"), "{ not json")
            .await
            .unwrap();

        let error = read_manifest(dir.path()).await.unwrap_err();
        assert!(matches!(error, PublishError::ManifestInvalid { .. }));
    }

    #[tokio::test]
    async fn test_read_manifest() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "pkg", "version": "0.1.0", "private": true}"#,
        )
        .await
        .unwrap();

        let manifest = read_manifest(dir.path()).await.unwrap();
        assert_eq!(manifest.name.as_deref(), Some("pkg"));
        assert!(manifest.private);
        assert!(manifest.publish_config.is_none());
    }
}
