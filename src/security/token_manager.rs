//! Registry credential handling
//!
//! Tokens are looked up in an explicit environment snapshot, held as
//! `SecretString` and only exposed when written to the npmrc file.
//! [`NpmrcAuthenticator`] is the production [`RegistryAuth`].

use crate::core::traits::{AuthSetupResult, MissingToken, RegistryAuth};
use crate::targets::{Protocol, ResolvedTarget};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use url::Url;

/// Secure token manager over an environment snapshot
///
/// # Examples
///
/// ```
/// use release_publisher::security::SecureTokenManager;
/// use std::collections::HashMap;
///
/// let env = HashMap::from([("NPM_TOKEN".to_string(), "npm_abcdef123456".to_string())]);
/// let manager = SecureTokenManager::new(&env);
/// assert!(manager.has_token("NPM_TOKEN"));
/// assert_eq!(SecureTokenManager::mask_token("npm_abcdef123456"), "npm...456");
/// ```
#[derive(Default)]
pub struct SecureTokenManager {
    tokens: HashMap<String, SecretString>,
}

impl std::fmt::Debug for SecureTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTokenManager")
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecureTokenManager {
    /// Capture every non-empty variable of the snapshot as a secret
    pub fn new(env: &HashMap<String, String>) -> Self {
        let tokens = env
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.clone(), SecretString::new(value.clone().into())))
            .collect();

        Self { tokens }
    }

    /// Token held in the given variable, if set
    pub fn get_token(&self, env_name: &str) -> Option<&SecretString> {
        self.tokens.get(env_name)
    }

    pub fn has_token(&self, env_name: &str) -> bool {
        self.tokens.contains_key(env_name)
    }

    /// Masks a token for safe logging
    ///
    /// Shows only the first 3 and last 3 characters. Tokens shorter than 10
    /// characters are fully masked as "****".
    pub fn mask_token(token: &str) -> String {
        if token.chars().count() < 10 {
            return "****".to_string();
        }

        let prefix: String = token.chars().take(3).collect();
        let suffix: String = token
            .chars()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}...{}", prefix, suffix)
    }

    /// Masks every credential-looking variable's value found in `text`
    ///
    /// Only variables whose name ends in `TOKEN` or `_AUTH` are considered,
    /// so ordinary environment values like paths are left alone.
    pub fn mask_tokens_in_string(&self, text: &str) -> String {
        let mut masked = text.to_string();

        for (name, token) in &self.tokens {
            if !(name.ends_with("TOKEN") || name.ends_with("_AUTH")) {
                continue;
            }
            let value = token.expose_secret();
            if value.len() < 4 {
                continue;
            }
            if let Ok(regex) = Regex::new(&regex::escape(value)) {
                let replacement = Self::mask_token(value);
                masked = regex.replace_all(&masked, replacement.as_str()).to_string();
            }
        }

        masked
    }
}

/// `//host[:port]/path/` key npm uses for per-registry settings
pub fn npmrc_registry_key(registry: &str) -> Option<String> {
    let url = Url::parse(registry).ok()?;
    let host = url.host_str()?;
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let mut path = url.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    Some(format!("//{}{}{}", host, port, path))
}

/// Writes `_authToken` lines for every npm target that declares a token variable
#[derive(Debug)]
pub struct NpmrcAuthenticator {
    tokens: std::sync::Arc<SecureTokenManager>,
    npmrc_path: PathBuf,
}

impl NpmrcAuthenticator {
    pub fn new(tokens: std::sync::Arc<SecureTokenManager>, npmrc_path: impl Into<PathBuf>) -> Self {
        Self {
            tokens,
            npmrc_path: npmrc_path.into(),
        }
    }

    /// Default npmrc location for the given environment (`$HOME/.npmrc`)
    pub fn default_npmrc_path(env: &HashMap<String, String>) -> Option<PathBuf> {
        env.get("HOME")
            .or_else(|| env.get("USERPROFILE"))
            .map(|home| Path::new(home).join(".npmrc"))
    }

    pub fn npmrc_path(&self) -> &Path {
        &self.npmrc_path
    }

    async fn write_npmrc(&self, entries: &BTreeMap<String, &SecretString>) -> anyhow::Result<()> {
        let existing = match tokio::fs::read_to_string(&self.npmrc_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read {}", self.npmrc_path.display())
                });
            }
        };

        // Drop stale credentials for the registries being configured
        let mut lines: Vec<String> = existing
            .lines()
            .filter(|line| {
                !entries
                    .keys()
                    .any(|key| line.trim_start().starts_with(&format!("{}:_authToken=", key)))
            })
            .map(str::to_string)
            .collect();

        for (key, token) in entries {
            lines.push(format!("{}:_authToken={}", key, token.expose_secret()));
        }

        let mut content = lines.join("\n");
        content.push('\n');

        if let Some(parent) = self.npmrc_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.npmrc_path, content)
            .await
            .with_context(|| format!("Failed to write {}", self.npmrc_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.npmrc_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl RegistryAuth for NpmrcAuthenticator {
    async fn configure(&self, targets: &[ResolvedTarget]) -> anyhow::Result<AuthSetupResult> {
        let mut result = AuthSetupResult::default();
        let mut entries: BTreeMap<String, &SecretString> = BTreeMap::new();

        for target in targets {
            let registry = target.registry_key().to_string();
            if result.configured_registries.contains(&registry)
                || result.missing_tokens.iter().any(|m| m.registry == registry)
            {
                continue;
            }

            let (Protocol::Npm, Some(url), Some(token_env)) =
                (target.protocol, target.registry.as_deref(), target.token_env.as_deref())
            else {
                // JSR and OIDC-trusted registries need no stored credential
                result.configured_registries.push(registry);
                continue;
            };

            match (self.tokens.get_token(token_env), npmrc_registry_key(url)) {
                (Some(token), Some(key)) => {
                    tracing::debug!(
                        registry = %url,
                        token = %SecureTokenManager::mask_token(token.expose_secret()),
                        "configuring registry credential"
                    );
                    entries.insert(key, token);
                    result.configured_registries.push(registry);
                }
                (None, _) => {
                    tracing::warn!(registry = %url, token_env, "registry token is not set");
                    result.missing_tokens.push(MissingToken {
                        registry,
                        token_env: token_env.to_string(),
                    });
                }
                (Some(_), None) => {
                    tracing::warn!(registry = %url, "registry URL cannot be used as an npmrc key");
                    result.missing_tokens.push(MissingToken {
                        registry,
                        token_env: token_env.to_string(),
                    });
                }
            }
        }

        if !entries.is_empty() {
            self.write_npmrc(&entries).await?;
        }

        result.success = result.missing_tokens.is_empty();
        Ok(result)
    }
}
