//! Target resolution
//!
//! Pure function of the package path and its manifest: no filesystem or
//! network access happens here.

use crate::core::error::PublishError;
use crate::targets::manifest::{ManifestPublishConfig, PackageManifest, TargetConfig, TargetObject};
use crate::targets::{Access, Protocol, ResolvedTarget};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

pub const NPM_REGISTRY: &str = "https://registry.npmjs.org/";
pub const GITHUB_REGISTRY: &str = "https://npm.pkg.github.com/";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

const DEFAULT_TAG: &str = "latest";

lazy_static! {
    static ref SCHEME: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").unwrap();
    static ref NON_ALNUM: Regex = Regex::new(r"[^A-Z0-9]+").unwrap();
}

/// Expand a target declaration into its canonical object form
pub fn expand_shorthand(config: &TargetConfig) -> Result<TargetObject, String> {
    let shorthand = match config {
        TargetConfig::Full(object) => return Ok(object.clone()),
        TargetConfig::Shorthand(shorthand) => shorthand.trim(),
    };

    match shorthand {
        "npm" => Ok(TargetObject {
            protocol: Protocol::Npm,
            registry: Some(NPM_REGISTRY.to_string()),
            provenance: Some(true),
            ..Default::default()
        }),
        "github" => Ok(TargetObject {
            protocol: Protocol::Npm,
            registry: Some(GITHUB_REGISTRY.to_string()),
            provenance: Some(true),
            token_env: Some(GITHUB_TOKEN_ENV.to_string()),
            ..Default::default()
        }),
        "jsr" => Ok(TargetObject {
            protocol: Protocol::Jsr,
            provenance: Some(false),
            ..Default::default()
        }),
        url if url.starts_with("https://") || url.starts_with("http://") => Ok(TargetObject {
            protocol: Protocol::Npm,
            registry: Some(url.to_string()),
            ..Default::default()
        }),
        other => Err(format!("unknown publish target '{}'", other)),
    }
}

/// Derive a token variable name from a registry URL
///
/// `https://registry.example.com/npm/` becomes `REGISTRY_EXAMPLE_COM_NPM_TOKEN`.
pub fn derive_token_env(registry: &str) -> String {
    let without_scheme = SCHEME.replace(registry, "");
    let upper = without_scheme.to_uppercase();
    let underscored = NON_ALNUM.replace_all(&upper, "_");
    format!("{}_TOKEN", underscored.trim_matches('_'))
}

/// Credential variable a registry needs when the target does not name one
fn default_token_env(registry: &str) -> Option<String> {
    if registry == NPM_REGISTRY {
        // Public npm publishes through OIDC trusted publishing
        None
    } else if registry == GITHUB_REGISTRY {
        Some(GITHUB_TOKEN_ENV.to_string())
    } else {
        Some(derive_token_env(registry))
    }
}

fn normalize_registry(registry: &str) -> String {
    let registry = registry.trim();
    if registry.ends_with('/') {
        registry.to_string()
    } else {
        format!("{}/", registry)
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn resolve_directory(package_path: &Path, directory: Option<&str>) -> PathBuf {
    match directory {
        Some(dir) => normalize_path(&package_path.join(dir)),
        None => normalize_path(package_path),
    }
}

fn npm_target(
    package_path: &Path,
    registry: &str,
    directory: Option<&str>,
    access: Access,
    provenance: bool,
    tag: String,
    token_env: Option<String>,
) -> ResolvedTarget {
    let registry = normalize_registry(registry);
    let token_env = token_env.or_else(|| default_token_env(&registry));

    ResolvedTarget {
        protocol: Protocol::Npm,
        registry: Some(registry),
        directory: resolve_directory(package_path, directory),
        access,
        provenance,
        tag,
        token_env,
    }
}

fn resolve_object(
    package_path: &Path,
    config: &ManifestPublishConfig,
    object: TargetObject,
) -> ResolvedTarget {
    let directory = object.directory.as_deref().or(config.directory.as_deref());
    let access = object.access.or(config.access).unwrap_or_default();
    let tag = object
        .tag
        .or_else(|| config.tag.clone())
        .unwrap_or_else(|| DEFAULT_TAG.to_string());

    match object.protocol {
        Protocol::Jsr => ResolvedTarget {
            protocol: Protocol::Jsr,
            registry: None,
            directory: resolve_directory(package_path, directory),
            access,
            provenance: object.provenance.or(config.provenance).unwrap_or(false),
            tag,
            token_env: object.token_env,
        },
        Protocol::Npm => npm_target(
            package_path,
            object.registry.as_deref().unwrap_or(NPM_REGISTRY),
            directory,
            access,
            object.provenance.or(config.provenance).unwrap_or(true),
            tag,
            object.token_env,
        ),
    }
}

/// Expand a package's publish configuration into resolved targets
///
/// `package_path` must be absolute; every target directory is resolved
/// against it.
pub fn resolve_targets(
    package_path: &Path,
    manifest: &PackageManifest,
) -> Result<Vec<ResolvedTarget>, PublishError> {
    let Some(config) = manifest.publish_config.as_ref() else {
        if manifest.private {
            return Ok(Vec::new());
        }
        return Ok(vec![npm_target(
            package_path,
            NPM_REGISTRY,
            None,
            Access::Restricted,
            true,
            DEFAULT_TAG.to_string(),
            None,
        )]);
    };

    let Some(targets) = config.targets.as_ref() else {
        // Legacy single-registry publishConfig
        return Ok(vec![npm_target(
            package_path,
            config.registry.as_deref().unwrap_or(NPM_REGISTRY),
            config.directory.as_deref(),
            config.access.unwrap_or_default(),
            config.provenance.unwrap_or(true),
            config.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
            None,
        )]);
    };

    targets
        .iter()
        .map(|target| {
            let object = expand_shorthand(target).map_err(|message| PublishError::ManifestInvalid {
                package: manifest
                    .name
                    .clone()
                    .unwrap_or_else(|| package_path.display().to_string()),
                message,
            })?;
            Ok(resolve_object(package_path, config, object))
        })
        .collect()
}
