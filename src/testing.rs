//! Scripted command runner for tests
//!
//! Replies to subprocess invocations from a rule table and records every
//! call, so pipeline behaviour can be checked without npm on the machine.

use crate::core::traits::{CommandOutput, CommandRunner};
use crate::security::CommandError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One recorded subprocess call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Program and arguments joined by spaces
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, e.g. the directory after `--pack-destination`
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;
type Responder = Box<dyn Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync>;

struct Rule {
    matcher: Matcher,
    responder: Responder,
}

/// Fake [`CommandRunner`]
///
/// The most recently added matching rule answers. Unmatched calls exit 127.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with a fixed output to calls whose command line contains `pattern`
    pub fn on(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.on_with(pattern, move |_| Ok(output.clone()))
    }

    /// Reply through a closure to calls whose command line contains `pattern`
    pub fn on_with<F>(&self, pattern: &str, responder: F) -> &Self
    where
        F: Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        let pattern = pattern.to_string();
        self.on_match(
            move |invocation| invocation.command_line().contains(&pattern),
            responder,
        )
    }

    /// Reply through a closure to calls accepted by `matcher`
    pub fn on_match<M, F>(&self, matcher: M, responder: F) -> &Self
    where
        M: Fn(&Invocation) -> bool + Send + Sync + 'static,
        F: Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        lock(&self.rules).push(Rule {
            matcher: Box::new(matcher),
            responder: Box::new(responder),
        });
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Calls whose command line contains `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|call| call.command_line().contains(pattern))
            .collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls_matching(pattern).len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, CommandError> {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
        };
        lock(&self.calls).push(invocation.clone());

        let rules = lock(&self.rules);
        match rules.iter().rev().find(|rule| (rule.matcher)(&invocation)) {
            Some(rule) => (rule.responder)(&invocation),
            None => Ok(CommandOutput::failed(
                127,
                format!("no scripted response for `{}`", invocation.command_line()),
            )),
        }
    }
}

/// Responder imitating `npm pack --json`
///
/// Writes `contents` as `filename` into the `--pack-destination` directory
/// (unless `--dry-run` is given) and reports the given SHA-1 shasum.
pub fn pack_responder(
    filename: &str,
    contents: &'static [u8],
    shasum: &str,
) -> impl Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync + 'static {
    let filename = filename.to_string();
    let shasum = shasum.to_string();

    move |invocation| {
        if !invocation.has_arg("--dry-run") {
            if let Some(destination) = invocation.arg_after("--pack-destination") {
                std::fs::write(Path::new(destination).join(&filename), contents)
                    .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
            }
        }

        Ok(CommandOutput::ok(format!(
            r#"[{{"filename": "{}", "shasum": "{}", "integrity": "sha512-test"}}]"#,
            filename, shasum
        )))
    }
}

/// `npm view --json` body for an existing version
pub fn view_json(name: &str, version: &str, shasum: &str) -> String {
    format!(
        r#"{{"name": "{name}", "version": "{version}", "versions": ["{version}"], "dist-tags": {{"latest": "{version}"}}, "dist": {{"shasum": "{shasum}", "integrity": "sha512-test", "tarball": "https://registry.npmjs.org/{name}/-/{name}-{version}.tgz"}}}}"#
    )
}

/// `npm view` failure for a version that does not exist
pub fn view_not_found(name: &str, version: &str) -> CommandOutput {
    CommandOutput::failed(
        1,
        format!(
            "npm error code E404\nnpm error 404 No match found for version {} of {}",
            version, name
        ),
    )
}
