//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The GitHub token is loaded from GITHUB_TOKEN or `token_file` and is never
//! read from the TOML directly. A token selects remote mode; without one the
//! store runs against local files for the whole process lifetime.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use key_pool::{KeyLayout, Period};
use repo_contents::{DEFAULT_API_BASE, RepoConfig, RetryPolicy};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub github: GithubConfig,
    pub retry: RetryConfig,
    pub admin: AdminConfig,
}

/// Key file layout, shared by both backends
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory the keys directory is resolved against in local mode
    pub local_root: PathBuf,
    pub keys_dir: String,
    #[serde(rename = "periods")]
    pub period_tags: Vec<String>,
    /// Parsed from `period_tags` during `load`
    #[serde(skip)]
    pub periods: Vec<Period>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("."),
            keys_dir: "data/keys".into(),
            period_tags: ["1d", "7d", "30d", "90d"].map(String::from).to_vec(),
            periods: Vec::new(),
        }
    }
}

/// Repository coordinates for remote mode
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file holding the token (alternative to GITHUB_TOKEN)
    pub token_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            owner: None,
            repo: None,
            branch: None,
            token: None,
            token_file: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_transient_attempts: u32,
    pub backoff_ms: u64,
    pub max_conflict_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_transient_attempts: policy.max_transient_attempts,
            backoff_ms: policy.base_backoff.as_millis() as u64,
            max_conflict_attempts: policy.max_conflict_attempts,
        }
    }
}

/// Admin API listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            max_connections: 64,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse TOML text, overlay environment variables and validate.
    ///
    /// Token resolution order:
    /// 1. GITHUB_TOKEN env var
    /// 2. `token_file` path from config
    pub fn parse(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        if let Some(owner) = non_empty_env("GITHUB_OWNER") {
            config.github.owner = Some(owner);
        }
        if let Some(repo) = non_empty_env("GITHUB_REPO") {
            config.github.repo = Some(repo);
        }

        if let Some(token) = non_empty_env("GITHUB_TOKEN") {
            config.github.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.github.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.github.token = Some(Secret::new(token));
            }
        }

        config.store.periods = config
            .store
            .period_tags
            .iter()
            .map(|tag| Period::parse(tag))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| common::Error::Config(format!("store.periods: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.store.periods.is_empty() {
            return Err(common::Error::Config(
                "store.periods must name at least one period".into(),
            ));
        }
        for (i, period) in self.store.periods.iter().enumerate() {
            if self.store.periods[..i].contains(period) {
                return Err(common::Error::Config(format!(
                    "store.periods lists period {period} more than once"
                )));
            }
        }

        if self.store.keys_dir.trim_matches('/').is_empty() {
            return Err(common::Error::Config("store.keys_dir must not be empty".into()));
        }

        if !self.github.api_base.starts_with("http://")
            && !self.github.api_base.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api_base must start with http:// or https://, got: {}",
                self.github.api_base
            )));
        }

        if self.github.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.retry.max_transient_attempts == 0 || self.retry.max_conflict_attempts == 0 {
            return Err(common::Error::Config(
                "retry attempt counts must be greater than 0".into(),
            ));
        }

        if self.admin.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.github.token.is_some()
            && (self.github.owner.is_none() || self.github.repo.is_none())
        {
            return Err(common::Error::Config(
                "a GitHub token is configured but owner or repo is missing".into(),
            ));
        }

        Ok(())
    }

    /// Repository settings when a token is present, `None` for local mode.
    pub fn remote(&self) -> Option<RepoConfig> {
        let token = self.github.token.clone()?;
        Some(RepoConfig {
            api_base: self.github.api_base.trim_end_matches('/').to_string(),
            owner: self.github.owner.clone()?,
            repo: self.github.repo.clone()?,
            branch: self.github.branch.clone(),
            token,
            timeout: Duration::from_secs(self.github.timeout_secs),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_transient_attempts: self.retry.max_transient_attempts,
            base_backoff: Duration::from_millis(self.retry.backoff_ms),
            max_conflict_attempts: self.retry.max_conflict_attempts,
        }
    }

    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(self.store.keys_dir.clone())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("keydrop.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
