//! Package manager command table
//!
//! Maps each logical operation (pack, publish, view, run, exec, dlx) to the
//! literal program and argument prefix of the configured package manager.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported JavaScript package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

/// Logical package manager operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Pack,
    Publish,
    View,
    Run,
    Exec,
    Dlx,
}

/// A program plus the arguments that precede operation-specific ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl CommandSpec {
    fn new(program: &'static str, prefix: &[&str]) -> Self {
        Self {
            program,
            args: prefix.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Append operation-specific arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Bun => "bun",
        }
    }

    /// Resolve the command for a logical operation
    ///
    /// yarn and bun go through npm for pack, publish and view: neither has a
    /// stable JSON pack output, tarball publish, or JSON registry view.
    pub fn command(&self, operation: Operation) -> CommandSpec {
        use Operation::*;
        use PackageManager::*;

        match (self, operation) {
            (Pnpm, Pack) => CommandSpec::new("pnpm", &["pack"]),
            (_, Pack) => CommandSpec::new("npm", &["pack"]),
            (Pnpm, Publish) => CommandSpec::new("pnpm", &["publish"]),
            (_, Publish) => CommandSpec::new("npm", &["publish"]),
            (Pnpm, View) => CommandSpec::new("pnpm", &["view"]),
            (_, View) => CommandSpec::new("npm", &["view"]),
            (Npm, Run) => CommandSpec::new("npm", &["run"]),
            (Pnpm, Run) => CommandSpec::new("pnpm", &["run"]),
            (Yarn, Run) => CommandSpec::new("yarn", &["run"]),
            (Bun, Run) => CommandSpec::new("bun", &["run"]),
            (Npm, Exec) => CommandSpec::new("npx", &[]),
            (Pnpm, Exec) => CommandSpec::new("pnpm", &["exec"]),
            (Yarn, Exec) => CommandSpec::new("yarn", &[]),
            (Bun, Exec) => CommandSpec::new("bunx", &[]),
            (Npm, Dlx) => CommandSpec::new("npx", &["--yes"]),
            (Pnpm, Dlx) => CommandSpec::new("pnpm", &["dlx"]),
            (Yarn, Dlx) => CommandSpec::new("yarn", &["dlx"]),
            (Bun, Dlx) => CommandSpec::new("bunx", &[]),
        }
    }

    /// Extra publish arguments this manager needs in CI
    pub fn publish_extra_args(&self) -> &'static [&'static str] {
        match self {
            // pnpm refuses to publish from a dirty tree or a non-release branch
            PackageManager::Pnpm => &["--no-git-checks"],
            _ => &[],
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManager {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "npm" => Ok(PackageManager::Npm),
            "pnpm" => Ok(PackageManager::Pnpm),
            "yarn" => Ok(PackageManager::Yarn),
            "bun" => Ok(PackageManager::Bun),
            other => Err(format!("unknown package manager: {}", other)),
        }
    }
}
