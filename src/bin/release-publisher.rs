//! Release Publisher CLI
//!
//! Multi-target npm/JSR release pipeline for CI workflows

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use release_publisher::github::{BuildEnvironment, CosignAttestationCreator, GithubClient};
use release_publisher::release::{CliGit, detect_releases_from_diff};
use release_publisher::targets::{read_manifest, resolve_targets};
use release_publisher::workflow::has_pending_changesets;
use release_publisher::{
    ConfigLoadOptions, ConfigLoader, ConfigOverrides, PackageManager, PipelineConfig,
    PreDetectedRelease, PublishOrchestrator, RetryManager, RetryOptions, SafeCommandExecutor,
    SecureTokenManager, WorkflowContext, WorkflowPhase, detect_phase,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// Multi-target npm/JSR release pipeline
#[derive(Parser)]
#[command(name = "release-publisher")]
#[command(version)]
#[command(about = "Multi-target npm/JSR release pipeline", long_about = None)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    /// Repository root (defaults to current directory)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Configuration file (defaults to <root>/.release-config.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Package manager override (npm, pnpm, yarn, bun)
    #[arg(long, global = true)]
    package_manager: Option<PackageManager>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct LogArgs {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Less output (-q warn, -qq error)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the workflow phase for the current CI trigger
    Phase {
        /// Event payload (defaults to $GITHUB_EVENT_PATH)
        #[arg(long, value_name = "FILE")]
        event_path: Option<PathBuf>,

        /// Do not ask the GitHub API which pull requests contain the commit
        #[arg(long)]
        offline: bool,
    },

    /// Print the resolved publish targets of a package
    Targets {
        /// Package directory containing package.json
        #[arg(value_name = "PACKAGE_DIR")]
        package_dir: PathBuf,
    },

    /// Print the releases a publish run would work on
    Releases {
        /// Detect version bumps between this commit and --head instead of changesets
        #[arg(long, requires = "head")]
        base: Option<String>,

        #[arg(long, requires = "base")]
        head: Option<String>,
    },

    /// Build, validate and publish every pending release
    Publish {
        /// Run everything except registry-mutating commands
        #[arg(long)]
        dry_run: bool,

        /// Treat "cannot compare digests" as an error
        #[arg(long)]
        strict_integrity: bool,

        /// Pre-detected releases as JSON, or @file
        #[arg(long, value_name = "JSON")]
        releases: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log);

    match run(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            tracing::error!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(args: LogArgs) {
    let level = match (args.quiet, args.verbose) {
        (0, 0) => LevelFilter::INFO,
        (0, 1) => LevelFilter::DEBUG,
        (0, _) => LevelFilter::TRACE,
        (1, _) => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .boxed();

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let overrides = ConfigOverrides {
        package_manager: cli.package_manager,
        dry_run: match &cli.command {
            Commands::Publish { dry_run: true, .. } => Some(true),
            _ => None,
        },
        strict_integrity: match &cli.command {
            Commands::Publish {
                strict_integrity: true,
                ..
            } => Some(true),
            _ => None,
        },
        ..Default::default()
    };

    let config = ConfigLoader::load(ConfigLoadOptions {
        project_path: root.clone(),
        config_file: cli.config,
        overrides,
        env: env.clone(),
    })
    .await?;

    let runner = Arc::new(SafeCommandExecutor::new());

    match cli.command {
        Commands::Phase {
            event_path,
            offline,
        } => phase_command(&root, &config, &env, event_path, offline).await,
        Commands::Targets { package_dir } => targets_command(&root, &package_dir).await,
        Commands::Releases { base, head } => {
            releases_command(&root, config, runner, &env, base.zip(head)).await
        }
        Commands::Publish { releases, .. } => {
            publish_command(&root, config, runner, &env, releases).await
        }
    }
}

fn github_client(config: &PipelineConfig, env: &HashMap<String, String>) -> Option<GithubClient> {
    let tokens = SecureTokenManager::new(env);
    let token = SecretString::new(tokens.get_token(&config.github.token_env)?.expose_secret().into());
    let retry = RetryManager::new(RetryOptions::from(&config.retry));

    match GithubClient::new(&config.github, token, retry) {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "GitHub API unavailable");
            None
        }
    }
}

async fn phase_command(
    root: &Path,
    config: &PipelineConfig,
    env: &HashMap<String, String>,
    event_path: Option<PathBuf>,
    offline: bool,
) -> Result<i32> {
    let event_path = event_path.or_else(|| env.get("GITHUB_EVENT_PATH").map(PathBuf::from));
    let event_json = match &event_path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read event payload {}", path.display()))?,
        None => String::new(),
    };

    let mut context = WorkflowContext::from_github_env(env, &event_json, config)?
        .with_pending_changesets(has_pending_changesets(root).await?);

    if !offline && context.event_name == "push" && !context.sha.is_empty() {
        match github_client(config, env) {
            Some(client) => match client.pulls_for_commit(&context.sha).await {
                Ok(pulls) => context = context.with_associated_pull_requests(pulls),
                Err(e) => tracing::warn!(error = %e, "cannot list pull requests for commit"),
            },
            None => tracing::warn!("no GitHub token, merged release pull requests cannot be detected"),
        }
    }

    let phase = detect_phase(&context);
    if let WorkflowPhase::None { reason } = &phase {
        tracing::info!(%reason, "no phase to run");
    }
    print_json(&phase)?;
    Ok(0)
}

async fn targets_command(root: &Path, package_dir: &Path) -> Result<i32> {
    let directory = if package_dir.is_absolute() {
        package_dir.to_path_buf()
    } else {
        root.join(package_dir)
    };

    let manifest = read_manifest(&directory).await?;
    let targets = resolve_targets(&directory, &manifest)?;
    print_json(&targets)?;
    Ok(0)
}

async fn releases_command(
    root: &Path,
    config: PipelineConfig,
    runner: Arc<SafeCommandExecutor>,
    env: &HashMap<String, String>,
    range: Option<(String, String)>,
) -> Result<i32> {
    let releases = match range {
        Some((base, head)) => {
            let git = CliGit::new(runner, root);
            detect_releases_from_diff(&git, root, &base, &head).await?
        }
        None => {
            PublishOrchestrator::new(root, config, runner, env)?
                .collect_releases(&[])
                .await?
        }
    };

    print_json(&releases)?;
    Ok(0)
}

async fn parse_releases(argument: &str) -> Result<Vec<PreDetectedRelease>> {
    let json = match argument.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read releases file {}", path))?,
        None => argument.to_string(),
    };
    serde_json::from_str(&json).context("invalid releases JSON")
}

async fn publish_command(
    root: &Path,
    config: PipelineConfig,
    runner: Arc<SafeCommandExecutor>,
    env: &HashMap<String, String>,
    releases: Option<String>,
) -> Result<i32> {
    let pre_detected = match releases {
        Some(argument) => parse_releases(&argument).await?,
        None => Vec::new(),
    };

    let client = github_client(&config, env);
    let mut orchestrator = PublishOrchestrator::new(root, config, runner.clone(), env)?;
    match client {
        Some(client) => {
            let creator = CosignAttestationCreator::new(
                runner,
                Arc::new(client),
                BuildEnvironment::from_env(env),
            );
            orchestrator = orchestrator.with_attestation(Arc::new(creator));
        }
        None => tracing::info!("no GitHub token, supplementary attestations disabled"),
    }

    let result = orchestrator.publish_packages(&pre_detected).await?;
    print_json(&result)?;

    if result.success {
        tracing::info!(
            packages = result.successful_packages,
            targets = result.successful_targets,
            "release published"
        );
        Ok(0)
    } else {
        if let Some(error) = &result.error {
            tracing::error!(%error, "release failed");
        }
        Ok(1)
    }
}
