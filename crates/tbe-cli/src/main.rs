//! TBE - Trusted Builds E2E harness CLI
//!
//! The `tbe` command drives the build-and-push workflow end to end and
//! exposes each wait on its own for debugging a pipeline by hand.
//!
//! ## Commands
//!
//! - `run`: full scenario, from scratch branch to attestation checks
//! - `find-run`: discovery poll for a commit
//! - `wait-run`: terminal-state poll for a run id
//! - `find-package`: digest-lookup scan over package versions
//! - `verify`: verify attestations of an already published image
//! - `trust`: bootstrap or reset the cosign trust root

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use tbe_core::{
    fetch_run_metadata, find_package_version_by_digest, find_run_for_commit,
    wait_for_run_completion, Delay, E2eConfig, DEFAULT_ENVIRONMENT,
};
use tbe_cosign::{
    image_reference, is_cosign_available, AttestationVerifier, CosignQueue, TrustConfig,
};
use tbe_forge::{GitHubClient, GitHubConfig, HostingApi};
use tbe_scenario::{check_attestations, BuildAndPushScenario, ScenarioVerdict};

#[derive(Parser)]
#[command(name = "tbe")]
#[command(author = "Trusted Builds E2E maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "End-to-end harness for the trusted build-and-push workflow", long_about = None)]
struct Cli {
    /// Directory holding default.toml and <env>.toml
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    /// Configuration environment (`ci` selects CI mode)
    #[arg(long, global = true, env = "TBE_ENV", default_value = DEFAULT_ENVIRONMENT)]
    env: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full build-and-push scenario
    Run {
        /// Scratch branch name (default: hex millisecond timestamp)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Poll for the workflow run triggered by a commit
    FindRun {
        /// Head commit SHA
        sha: String,
    },

    /// Poll a workflow run until it completes
    WaitRun {
        run_id: u64,

        /// Also download and print the run's metadata artifact
        #[arg(long)]
        metadata: bool,
    },

    /// Find the package version for an image digest
    FindPackage {
        /// Image digest, e.g. sha256:...
        digest: String,
    },

    /// Verify the configured attestation types for an image digest
    Verify {
        digest: String,
    },

    /// Manage the cosign trust root
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },
}

#[derive(Subcommand)]
enum TrustAction {
    /// Back up ~/.sigstore and initialize from the configured mirror
    Init,
    /// Restore the backed-up trust root
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tbe_core::init_tracing(cli.json, level);

    let config = E2eConfig::load(&cli.config_dir, &cli.env)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config_dir))?;
    info!(environment = %config.environment, mode = ?config.mode, "Loaded configuration");

    match cli.command {
        Commands::Run { branch } => cmd_run(config, branch, cli.json).await,
        Commands::FindRun { sha } => cmd_find_run(&config, &sha).await,
        Commands::WaitRun { run_id, metadata } => cmd_wait_run(&config, run_id, metadata).await,
        Commands::FindPackage { digest } => cmd_find_package(&config, &digest).await,
        Commands::Verify { digest } => cmd_verify(&config, &digest).await,
        Commands::Trust { action } => match action {
            TrustAction::Init => cmd_trust_init(&config).await,
            TrustAction::Reset => cmd_trust_reset(&config).await,
        },
    }
}

fn hosting_client(config: &E2eConfig) -> Result<Arc<dyn HostingApi>> {
    config.validate().context("Invalid configuration")?;
    let credentials = config.credentials()?;
    let github = GitHubConfig::new(credentials).with_api_url(&config.github.api_url);
    let client = GitHubClient::new(github).context("Failed to build GitHub client")?;
    Ok(Arc::new(client))
}

async fn resolve_owner(api: &dyn HostingApi, config: &E2eConfig) -> Result<String> {
    match &config.github.owner {
        Some(owner) => Ok(owner.clone()),
        None => Ok(api
            .authenticated_user()
            .await
            .context("Failed to resolve authenticated user")?
            .login),
    }
}

async fn cosign_queue(config: &E2eConfig) -> Result<CosignQueue> {
    let tool = config.cosign_tool();
    if !is_cosign_available(&tool.program).await {
        anyhow::bail!(
            "cosign not found at {:?}; install it or set cosign.program",
            tool.program
        );
    }
    Ok(CosignQueue::spawn(tool))
}

/// A delay that Ctrl-C cancels, ending any poll in progress.
fn interruptible_delay() -> Delay {
    let delay = Delay::new();
    let handle = delay.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            handle.cancel();
        }
    });
    delay
}

/// Run the full scenario and print its report
async fn cmd_run(config: E2eConfig, branch: Option<String>, json: bool) -> Result<()> {
    let api = hosting_client(&config)?;
    let queue = cosign_queue(&config).await?;

    let mut scenario =
        BuildAndPushScenario::new(api, config, queue).with_delay(interruptible_delay());
    if let Some(branch) = branch {
        scenario = scenario.with_branch(branch);
    }

    let report = scenario.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    if report.passed() {
        Ok(())
    } else {
        anyhow::bail!("{}", report.verdict.message)
    }
}

/// Discovery poll for a commit
async fn cmd_find_run(config: &E2eConfig, sha: &str) -> Result<()> {
    let api = hosting_client(config)?;
    let owner = resolve_owner(api.as_ref(), config).await?;
    let repo = config.repo(&owner);

    let run = find_run_for_commit(
        api.as_ref(),
        &repo,
        &config.workflow,
        sha,
        &config.polling.discovery_policy(),
        &interruptible_delay(),
    )
    .await?;

    println!("Run ID: {}", run.id);
    println!("Status: {}", run.status);
    if let Some(url) = &run.html_url {
        println!("URL: {}", url);
    }
    Ok(())
}

/// Terminal-state poll for a run
async fn cmd_wait_run(config: &E2eConfig, run_id: u64, metadata: bool) -> Result<()> {
    let api = hosting_client(config)?;
    let owner = resolve_owner(api.as_ref(), config).await?;
    let repo = config.repo(&owner);

    let run = wait_for_run_completion(
        api.as_ref(),
        &repo,
        run_id,
        &config.polling.completion_policy(),
        &interruptible_delay(),
    )
    .await?;

    let conclusion = run.conclusion.as_ref().map(|c| c.as_str()).unwrap_or("none");
    println!("Run {}: {} ({})", run.id, run.status, conclusion);

    if metadata {
        let metadata = fetch_run_metadata(api.as_ref(), &repo, run_id, &config.workflow).await?;
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    }

    if run.succeeded() {
        Ok(())
    } else {
        anyhow::bail!("Workflow run {} concluded {}", run.id, conclusion)
    }
}

/// Digest-lookup scan
async fn cmd_find_package(config: &E2eConfig, digest: &str) -> Result<()> {
    let api = hosting_client(config)?;
    let owner = resolve_owner(api.as_ref(), config).await?;

    let version = find_package_version_by_digest(
        api.as_ref(),
        &config.package_owner(&owner),
        config.package_name(),
        digest,
    )
    .await?;

    println!("Version ID: {}", version.id);
    println!("Digest: {}", version.name);
    println!("Tags: {}", version.tags().join(", "));
    Ok(())
}

/// Verify attestations for an existing image
async fn cmd_verify(config: &E2eConfig, digest: &str) -> Result<()> {
    let api = hosting_client(config)?;
    let owner = resolve_owner(api.as_ref(), config).await?;
    let queue = cosign_queue(config).await?;

    let image = image_reference(
        &config.scenario.registry,
        &owner.to_lowercase(),
        &config.package_name().to_lowercase(),
        digest,
    );

    let trust = if config.trust_enabled() {
        Some(TrustConfig::bootstrap(&queue, config.home()?, &config.trust_settings()?).await?)
    } else {
        None
    };

    let verifier = AttestationVerifier::new(queue, config.verify_options());
    let checks = check_attestations(&verifier, &image, &config.cosign.attestation_types).await;

    if let Some(guard) = trust {
        guard.restore().await.context("Failed to restore cosign trust root")?;
    }

    println!("Image: {}", image);
    for check in &checks {
        let status = if check.passed { "✓" } else { "✗" };
        println!("  {} {}: {}", status, check.check, check.detail);
    }

    let verdict = ScenarioVerdict::evaluate(&checks);
    if verdict.passed {
        Ok(())
    } else {
        anyhow::bail!("{}", verdict.message)
    }
}

/// Bootstrap the trust root and leave it in place
async fn cmd_trust_init(config: &E2eConfig) -> Result<()> {
    let queue = cosign_queue(config).await?;
    let home = config.home()?;
    let settings = config.trust_settings()?;

    let guard = TrustConfig::bootstrap(&queue, home, &settings)
        .await
        .context("Failed to initialize trust root")?;
    guard.keep();

    println!("Initialized trust root from {}", settings.mirror);
    println!("Run `tbe trust reset` to restore the original.");
    Ok(())
}

/// Restore the trust root backed up by `trust init`
async fn cmd_trust_reset(config: &E2eConfig) -> Result<()> {
    let home = config.home()?;
    tbe_cosign::trust::reset(home)
        .await
        .context("Failed to reset trust root")?;
    println!("Restored trust root in {}", home.display());
    Ok(())
}
