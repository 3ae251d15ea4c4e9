//! Publish targets
//!
//! A package's `publishConfig` is expanded into [`ResolvedTarget`]s before
//! anything else in the pipeline looks at it.

pub mod manifest;
pub mod resolver;

pub use manifest::{
    ManifestPublishConfig, PackageManifest, TargetConfig, TargetObject, WorkspacesField,
    read_manifest,
};
pub use resolver::{
    GITHUB_REGISTRY, GITHUB_TOKEN_ENV, NPM_REGISTRY, derive_token_env, expand_shorthand,
    normalize_path, resolve_targets,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Registry protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Npm,
    Jsr,
}

/// Package access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Public,
    #[default]
    Restricted,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Public => "public",
            Access::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-materialized publish destination
///
/// `registry` is `Some` exactly when `protocol` is npm. Constructed once per
/// run by [`resolve_targets`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTarget {
    pub protocol: Protocol,
    pub registry: Option<String>,
    /// Absolute directory containing the publishable package.json
    pub directory: PathBuf,
    pub access: Access,
    pub provenance: bool,
    pub tag: String,
    /// Environment variable holding the credential, `None` for OIDC trust
    pub token_env: Option<String>,
}

impl ResolvedTarget {
    /// Registry URL for npm targets, `"jsr"` for JSR
    ///
    /// Together with the package name this identifies a target in skip sets
    /// and error reports.
    pub fn registry_key(&self) -> &str {
        match self.protocol {
            Protocol::Jsr => "jsr",
            Protocol::Npm => self.registry.as_deref().unwrap_or(NPM_REGISTRY),
        }
    }
}

/// One release with its resolved targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageTargets {
    pub name: String,
    pub version: String,
    /// Package root
    pub path: PathBuf,
    pub targets: Vec<ResolvedTarget>,
}
