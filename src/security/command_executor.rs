//! SafeCommandExecutor: allowlisted async subprocess execution
//!
//! # Security Features
//!
//! - **Allowlist validation**: Only the package managers, git and cosign can run
//! - **Injection prevention**: Arguments are passed as a vector, never through a shell
//! - **Working directory validation**: The directory must exist before spawning
//! - **Timeout control**: A hung registry call is killed instead of stalling CI
//!
//! # Example
//!
//! ```rust,no_run
//! use release_publisher::core::CommandRunner;
//! use release_publisher::security::SafeCommandExecutor;
//! use std::time::Duration;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let executor = SafeCommandExecutor::new().with_timeout(Duration::from_secs(30));
//! let output = executor.run("npm", &["--version".to_string()], None).await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

use crate::core::traits::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Programs the pipeline is allowed to spawn
const ALLOWED_COMMANDS: &[&str] = &["npm", "pnpm", "yarn", "bun", "npx", "bunx", "git", "cosign"];

/// Default upper bound for a single subprocess
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowlist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Spawning failed (binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

/// Production [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    timeout: Duration,
    extra_allowed: Vec<String>,
}

impl Default for SafeCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeCommandExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            extra_allowed: Vec::new(),
        }
    }

    /// Set command execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allow one more program beyond the built-in list
    pub fn allow(mut self, program: impl Into<String>) -> Self {
        self.extra_allowed.push(program.into());
        self
    }

    pub fn is_allowed(&self, program: &str) -> bool {
        ALLOWED_COMMANDS.contains(&program) || self.extra_allowed.iter().any(|p| p == program)
    }

    fn program_name(program: &str) -> String {
        // npm, pnpm, yarn and npx ship as .cmd shims on Windows
        if cfg!(target_os = "windows") && matches!(program, "npm" | "pnpm" | "yarn" | "npx") {
            format!("{}.cmd", program)
        } else {
            program.to_string()
        }
    }
}

#[async_trait]
impl CommandRunner for SafeCommandExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, CommandError> {
        if !self.is_allowed(program) {
            return Err(CommandError::CommandNotAllowed(program.to_string()));
        }

        let mut command = Command::new(Self::program_name(program));
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            if !dir.is_dir() {
                return Err(CommandError::InvalidWorkingDirectory(dir.to_path_buf()));
            }
            command.current_dir(dir);
        }

        tracing::debug!(program, args = ?args, cwd = ?cwd, "exec");

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CommandError::Timeout(self.timeout))?
            .map_err(|e| CommandError::ExecutionFailed(format!("{}: {}", program, e)))?;

        let result = CommandOutput {
            // Killed by a signal: no exit code, report a generic failure
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::trace!(program, exit_code = result.exit_code, "exec finished");
        Ok(result)
    }
}
