//! Harness configuration.
//!
//! Assembled once per process and passed down:
//!
//! 1. `<dir>/default.toml`
//! 2. `<dir>/<environment>.toml`, merged table by table over the defaults
//! 3. environment variables (credentials, owner, repository, `HOME`)
//!
//! Every field has a default except the repository and the credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tbe_cosign::{
    CosignTool, IdentityMatcher, TrustSettings, VerifyOptions, DEFAULT_ATTESTATION_TYPES,
    DEFAULT_ISSUER,
};
use tbe_forge::{
    AppCredentials, Credentials, MergeMethod, OwnerKind, PackageOwner, RepoRef, DEFAULT_API_URL,
};
use tracing::{debug, warn};

use crate::domain::{E2eError, Result};
use crate::poll::PollPolicy;
use crate::tags::TagPolicy;

/// Environment used when none is named.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Environment name that selects [`Mode::Ci`].
pub const CI_ENVIRONMENT: &str = "ci";

/// Whether the harness runs unattended in CI or on a developer machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// GitHub App auth; the runner has already initialized cosign
    Ci,
    #[default]
    Interactive,
}

impl Mode {
    pub fn for_environment(environment: &str) -> Self {
        if environment == CI_ENVIRONMENT {
            Mode::Ci
        } else {
            Mode::Interactive
        }
    }
}

/// GitHub App identity used in CI.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    pub app_id: u64,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub installation_id: u64,
}

impl std::fmt::Debug for AppSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSettings")
            .field("app_id", &self.app_id)
            .field("private_key", &"<redacted>")
            .field("installation_id", &self.installation_id)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub api_url: String,
    /// Fixture owner; the authenticated user when unset
    pub owner: Option<String>,
    pub owner_type: OwnerKind,
    /// Fixture repository name
    pub repository: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub app: Option<AppSettings>,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        GitHubSettings {
            api_url: DEFAULT_API_URL.to_string(),
            owner: None,
            owner_type: OwnerKind::User,
            repository: String::new(),
            token: None,
            app: None,
        }
    }
}

impl std::fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSettings")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("owner_type", &self.owner_type)
            .field("repository", &self.repository)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("app", &self.app)
            .finish()
    }
}

/// The workflow under test and the artifact it publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Workflow file name under `.github/workflows`
    pub file: String,
    /// Triggering event to filter runs by
    pub event: String,
    pub metadata_artifact: String,
    /// JSON document inside the metadata artifact
    pub metadata_entry: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            file: "build-and-push.yaml".to_string(),
            event: "push".to_string(),
            metadata_artifact: "workflow-metadata".to_string(),
            metadata_entry: "workflow-metadata.json".to_string(),
        }
    }
}

/// How the scenario drives the fixture repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSettings {
    pub base_branch: String,
    /// File rewritten on the scratch branch
    pub fixture_path: String,
    pub pull_request_title: String,
    pub merge_method: MergeMethod,
    /// Container registry host
    pub registry: String,
    /// Container package name; the repository name when unset
    pub package: Option<String>,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        ScenarioSettings {
            base_branch: "main".to_string(),
            fixture_path: "test".to_string(),
            pull_request_title: "test".to_string(),
            merge_method: MergeMethod::Squash,
            registry: "ghcr.io".to_string(),
            package: None,
        }
    }
}

/// Attempt bound and delay of one poll, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl PollSettings {
    pub fn policy(&self, retry_on_error: bool) -> PollPolicy {
        PollPolicy::new(
            self.attempts,
            Duration::from_secs(self.delay_secs),
            retry_on_error,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub discovery: PollSettings,
    pub completion: PollSettings,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            discovery: PollSettings {
                attempts: 10,
                delay_secs: 5,
            },
            completion: PollSettings {
                attempts: 30,
                delay_secs: 10,
            },
        }
    }
}

impl PollingConfig {
    /// Discovery tolerates transient listing errors.
    pub fn discovery_policy(&self) -> PollPolicy {
        self.discovery.policy(true)
    }

    /// A failed status fetch ends the completion wait.
    pub fn completion_policy(&self) -> PollPolicy {
        self.completion.policy(false)
    }
}

/// Custom trust root bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustBootstrap {
    /// Defaults to on outside CI
    pub enabled: Option<bool>,
    pub mirror: String,
    /// `root.json`, relative paths resolved against the working directory
    pub root: PathBuf,
}

impl Default for TrustBootstrap {
    fn default() -> Self {
        TrustBootstrap {
            enabled: None,
            mirror: "https://tuf-repo-cdn.sigstage.dev".to_string(),
            root: PathBuf::from("sigstore/staging-root.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosignSettings {
    pub program: PathBuf,
    /// Home directory holding `.sigstore`; `$HOME` when unset
    pub home: Option<PathBuf>,
    pub rekor_url: Option<String>,
    pub identity: IdentityMatcher,
    pub issuer: String,
    pub attestation_types: Vec<String>,
    pub trust: TrustBootstrap,
}

impl Default for CosignSettings {
    fn default() -> Self {
        CosignSettings {
            program: PathBuf::from(tbe_cosign::DEFAULT_PROGRAM),
            home: None,
            rekor_url: None,
            identity: IdentityMatcher::default(),
            issuer: DEFAULT_ISSUER.to_string(),
            attestation_types: DEFAULT_ATTESTATION_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            trust: TrustBootstrap::default(),
        }
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eConfig {
    /// Set by [`E2eConfig::load`]
    #[serde(skip_deserializing)]
    pub environment: String,
    #[serde(skip_deserializing)]
    pub mode: Mode,
    pub github: GitHubSettings,
    pub workflow: WorkflowConfig,
    pub scenario: ScenarioSettings,
    pub polling: PollingConfig,
    pub tags: TagPolicy,
    pub cosign: CosignSettings,
}

impl E2eConfig {
    /// Load `default.toml` and `<environment>.toml` from `dir`, then apply
    /// process environment overrides.
    pub fn load(dir: &Path, environment: &str) -> Result<Self> {
        let mut merged = read_table(&dir.join("default.toml"))?.unwrap_or_default();
        match read_table(&dir.join(format!("{environment}.toml")))? {
            Some(overlay) => merge_tables(&mut merged, overlay),
            None => debug!(environment, "No environment overlay"),
        }

        let mut config = Self::from_table(merged, environment)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse TOML text for `environment` without touching the filesystem or
    /// the process environment.
    pub fn from_toml_str(text: &str, environment: &str) -> Result<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| E2eError::Config(e.to_string()))?;
        Self::from_table(table, environment)
    }

    fn from_table(table: toml::Table, environment: &str) -> Result<Self> {
        let mut config: E2eConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| E2eError::Config(e.to_string()))?;
        config.environment = environment.to_string();
        config.mode = Mode::for_environment(environment);
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(owner) = get("TBE_OWNER") {
            self.github.owner = Some(owner);
        }
        if let Some(repository) = get("TBE_REPOSITORY") {
            self.github.repository = repository;
        }
        if let Some(kind) = get("TBE_OWNER_TYPE") {
            self.github.owner_type = kind.parse().map_err(E2eError::Config)?;
        }
        if let Some(url) = get("TBE_API_URL") {
            self.github.api_url = url;
        }

        let app = (
            get("GITHUB_APP_ID"),
            get("GITHUB_APP_PRIVATE_KEY"),
            get("GITHUB_APP_INSTALLATION_ID"),
        );
        match app {
            (Some(id), Some(key), Some(installation)) => {
                self.github.app = Some(AppSettings {
                    app_id: parse_id("GITHUB_APP_ID", &id)?,
                    // Keys passed through env often carry literal "\n".
                    private_key: key.replace("\\n", "\n"),
                    installation_id: parse_id("GITHUB_APP_INSTALLATION_ID", &installation)?,
                });
            }
            (None, None, None) => {}
            _ => warn!("Ignoring partial GitHub App settings in the environment"),
        }

        if self.cosign.home.is_none() {
            self.cosign.home = get("HOME").map(PathBuf::from);
        }
        Ok(())
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.github.repository.trim().is_empty() {
            return Err(E2eError::Config(
                "github.repository is required (or set TBE_REPOSITORY)".to_string(),
            ));
        }
        if self.github.token.is_none() && self.github.app.is_none() {
            return Err(E2eError::Config(
                "no credentials: set GITHUB_TOKEN or the GITHUB_APP_* variables".to_string(),
            ));
        }
        if self.mode == Mode::Ci && self.github.app.is_none() {
            warn!("CI mode without GitHub App credentials, falling back to token auth");
        }

        for (name, settings) in [
            ("discovery", &self.polling.discovery),
            ("completion", &self.polling.completion),
        ] {
            if settings.attempts == 0 {
                return Err(E2eError::Config(format!(
                    "polling.{name}.attempts must be at least 1"
                )));
            }
        }

        if self.cosign.attestation_types.iter().any(|t| t.trim().is_empty()) {
            return Err(E2eError::Config(
                "cosign.attestation_types must not contain empty entries".to_string(),
            ));
        }
        if let IdentityMatcher::Regexp(pattern) = &self.cosign.identity {
            regex::Regex::new(pattern).map_err(|e| {
                E2eError::Config(format!("cosign.identity is not a valid regexp: {e}"))
            })?;
        }
        if self.tags.moving.iter().any(|t| t.is_empty()) {
            return Err(E2eError::Config("tags.moving must not contain empty tags".to_string()));
        }

        if self.trust_enabled() {
            if self.cosign.home.is_none() {
                return Err(E2eError::Config(
                    "trust bootstrap needs cosign.home or HOME".to_string(),
                ));
            }
            if self.cosign.trust.mirror.trim().is_empty() {
                return Err(E2eError::Config("cosign.trust.mirror is required".to_string()));
            }
        }
        Ok(())
    }

    /// Whether the scenario replaces the trust root before verifying.
    pub fn trust_enabled(&self) -> bool {
        self.cosign.trust.enabled.unwrap_or(self.mode != Mode::Ci)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(app) = &self.github.app {
            if self.mode == Mode::Ci || self.github.token.is_none() {
                return Ok(Credentials::App(AppCredentials {
                    app_id: app.app_id,
                    private_key: app.private_key.clone(),
                    installation_id: app.installation_id,
                }));
            }
        }
        self.github
            .token
            .clone()
            .map(Credentials::Token)
            .ok_or_else(|| E2eError::Config("no GitHub credentials configured".to_string()))
    }

    pub fn repo(&self, owner: &str) -> RepoRef {
        RepoRef::new(owner, self.github.repository.as_str())
    }

    pub fn package_owner(&self, owner: &str) -> PackageOwner {
        PackageOwner::new(self.github.owner_type, owner)
    }

    pub fn package_name(&self) -> &str {
        self.scenario
            .package
            .as_deref()
            .unwrap_or(&self.github.repository)
    }

    pub fn cosign_tool(&self) -> CosignTool {
        let tool = CosignTool::new(self.cosign.program.clone());
        match &self.cosign.home {
            Some(home) => tool.with_home(home.clone()),
            None => tool,
        }
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            identity: self.cosign.identity.clone(),
            issuer: self.cosign.issuer.clone(),
            rekor_url: self.cosign.rekor_url.clone(),
        }
    }

    /// Trust bootstrap settings with the root path made absolute.
    pub fn trust_settings(&self) -> Result<TrustSettings> {
        let root = &self.cosign.trust.root;
        let root = if root.is_absolute() {
            root.clone()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(TrustSettings {
            mirror: self.cosign.trust.mirror.clone(),
            root,
        })
    }

    pub fn home(&self) -> Result<&Path> {
        self.cosign
            .home
            .as_deref()
            .ok_or_else(|| E2eError::Config("cosign.home is not set and HOME is empty".to_string()))
    }
}

fn parse_id(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| E2eError::Config(format!("{key} must be a number, got '{value}'")))
}

fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let table = text
        .parse::<toml::Table>()
        .map_err(|e| E2eError::Config(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), "Loaded configuration file");
    Ok(Some(table))
}

/// Deep-merge `overlay` into `base`; tables merge, everything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(overlay_table) = value {
            if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                merge_tables(base_table, overlay_table);
                continue;
            }
            base.insert(key, toml::Value::Table(overlay_table));
        } else {
            base.insert(key, value);
        }
    }
}
