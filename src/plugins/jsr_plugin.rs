//! JSR Plugin - publishing through the `jsr` CLI
//!
//! JSR offers no cheap existence check, so the only idempotency signal is
//! the CLI's own "already published" output.

use crate::core::package_manager::Operation;
use crate::core::traits::CommandRunner;
use crate::plugins::{AlreadyPublishedPatterns, PublishContext, PublishResult, TargetPlugin};
use crate::registry::IntegrityComparison;
use crate::targets::{Protocol, ResolvedTarget};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    static ref JSR_URL: Regex =
        Regex::new(r"https://jsr\.io/@[\w.-]+/[\w.-]+(@[\w.+-]+)?").unwrap();
}

pub fn extract_jsr_url(output: &str) -> Option<String> {
    JSR_URL.find(output).map(|m| m.as_str().to_string())
}

pub struct JsrPlugin {
    runner: Arc<dyn CommandRunner>,
    patterns: AlreadyPublishedPatterns,
}

impl JsrPlugin {
    pub fn new(runner: Arc<dyn CommandRunner>, patterns: AlreadyPublishedPatterns) -> Self {
        Self { runner, patterns }
    }
}

#[async_trait]
impl TargetPlugin for JsrPlugin {
    fn protocol(&self) -> Protocol {
        Protocol::Jsr
    }

    async fn publish(&self, target: &ResolvedTarget, context: &PublishContext<'_>) -> PublishResult {
        // Build artifacts leave the tree dirty
        let spec = context
            .package_manager
            .command(Operation::Dlx)
            .with_args(["jsr", "publish", "--allow-dirty"]);

        tracing::info!(directory = %target.directory.display(), "publishing to jsr");

        let output = match self
            .runner
            .run(spec.program, &spec.args, Some(&target.directory))
            .await
        {
            Ok(output) => output,
            Err(e) => return PublishResult::failure(format!("[jsr] publish failed: {}", e)),
        };

        let combined = output.combined();
        let mut result = PublishResult {
            output: combined.clone(),
            exit_code: Some(output.exit_code),
            registry_url: extract_jsr_url(&combined),
            ..Default::default()
        };

        if output.success() {
            result.success = true;
            return result;
        }

        if self.patterns.matches(Protocol::Jsr, &combined) {
            tracing::info!(directory = %target.directory.display(), "version already on jsr");
            result.success = true;
            result.already_published = true;
            result.already_published_reason = Some(IntegrityComparison::Unknown);
            return result;
        }

        result.error = Some(format!(
            "[jsr] publish failed: exit code {}: {}",
            output.exit_code,
            combined.trim()
        ));
        result
    }
}
