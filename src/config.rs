//! Configuration loader and validator for the commit watcher.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::{RepoId, WatchTarget};

pub const DEFAULT_API_BASE: &str = "https://api.github.com/";

static OWNER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").expect("valid owner regex"));
static REPO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid repo regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub github: GitHub,
    pub watch: Vec<WatchEntry>,
    #[serde(default)]
    pub tuning: Tuning,
}

/// Upstream API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHub {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
}

impl Default for GitHub {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            username: String::new(),
            token: String::new(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// One `(owner, repo) -> webhook` mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEntry {
    pub owner: String,
    pub repo: String,
    pub webhook_url: String,
}

/// Cooldowns and rendering knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tuning {
    /// Sleep after every check cycle.
    pub cycle_cooldown_secs: u64,
    /// Sleep after every webhook post.
    pub post_cooldown_secs: u64,
    /// Wait before retrying when an API looks down.
    pub api_down_wait_secs: u64,
    /// Minutes before startup from which commits count as new.
    pub startup_offset_minutes: u64,
    /// Files listed per commit before the changelist is truncated.
    pub truncate_at: usize,
    pub request_timeout_secs: u64,
    pub verbose: bool,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            cycle_cooldown_secs: 60,
            post_cooldown_secs: 2,
            api_down_wait_secs: 300,
            startup_offset_minutes: 15,
            truncate_at: 10,
            request_timeout_secs: 30,
            verbose: false,
        }
    }
}

impl Tuning {
    pub fn cycle_cooldown(&self) -> Duration {
        Duration::from_secs(self.cycle_cooldown_secs)
    }

    pub fn post_cooldown(&self) -> Duration {
        Duration::from_secs(self.post_cooldown_secs)
    }

    pub fn api_down_wait(&self) -> Duration {
        Duration::from_secs(self.api_down_wait_secs)
    }

    pub fn startup_offset(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.startup_offset_minutes as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Basic-auth pair attached to upstream requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Targets in configuration order.
    pub fn targets(&self) -> Vec<WatchTarget> {
        self.watch
            .iter()
            .map(|entry| WatchTarget {
                id: RepoId::new(entry.owner.clone(), entry.repo.clone()),
                webhook_url: entry.webhook_url.clone(),
            })
            .collect()
    }

    /// Credentials when both parts are present, `None` means anonymous access.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.github.username.trim();
        let token = self.github.token.trim();
        if username.is_empty() || token.is_empty() {
            return None;
        }
        Some(Credentials {
            username: username.to_string(),
            token: token.to_string(),
        })
    }

    /// Apply `GITHUB_USERNAME` / `GITHUB_TOKEN` over the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("GITHUB_USERNAME").ok(),
            std::env::var("GITHUB_TOKEN").ok(),
        );
    }

    fn apply_overrides(&mut self, username: Option<String>, token: Option<String>) {
        if let Some(username) = username.filter(|v| !v.trim().is_empty()) {
            self.github.username = username;
        }
        if let Some(token) = token.filter(|v| !v.trim().is_empty()) {
            self.github.token = token;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn check_http_url(field: &str, raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| invalid(format!("{field} is not a URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("{field} must be http(s), got {other}"))),
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    check_http_url("github.api_base", &cfg.github.api_base)?;

    if cfg.watch.is_empty() {
        return Err(invalid("watch must list at least one repository"));
    }

    let mut seen = HashSet::new();
    for (idx, entry) in cfg.watch.iter().enumerate() {
        if !OWNER_RE.is_match(&entry.owner) {
            return Err(invalid(format!("watch[{idx}].owner is not a valid owner: {:?}", entry.owner)));
        }
        if !REPO_RE.is_match(&entry.repo) || entry.repo == "." || entry.repo == ".." {
            return Err(invalid(format!("watch[{idx}].repo is not a valid repository name: {:?}", entry.repo)));
        }
        check_http_url(&format!("watch[{idx}].webhook_url"), &entry.webhook_url)?;
        let key = (entry.owner.to_ascii_lowercase(), entry.repo.to_ascii_lowercase());
        if !seen.insert(key) {
            return Err(invalid(format!(
                "watch[{idx}] duplicates {}/{}",
                entry.owner, entry.repo
            )));
        }
    }

    let t = &cfg.tuning;
    if t.cycle_cooldown_secs == 0 {
        return Err(invalid("tuning.cycle_cooldown_secs must be > 0"));
    }
    if t.api_down_wait_secs == 0 {
        return Err(invalid("tuning.api_down_wait_secs must be > 0"));
    }
    if t.truncate_at == 0 {
        return Err(invalid("tuning.truncate_at must be > 0"));
    }
    if t.request_timeout_secs == 0 {
        return Err(invalid("tuning.request_timeout_secs must be > 0"));
    }
    // post_cooldown_secs and startup_offset_minutes may legitimately be 0

    Ok(())
}

/// Returns an example YAML document that passes validation.
pub fn example() -> &'static str {
    r#"github:
  api_base: "https://api.github.com/"
  # optional; raises the rate limit ceiling. GITHUB_USERNAME / GITHUB_TOKEN override these.
  username: ""
  token: ""

watch:
  - owner: "octocat"
    repo: "Hello-World"
    webhook_url: "https://discord.com/api/webhooks/123/abc"

tuning:
  cycle_cooldown_secs: 60
  post_cooldown_secs: 2
  api_down_wait_secs: 300
  startup_offset_minutes: 15
  truncate_at: 10
  request_timeout_secs: 30
  verbose: false
"#
}
