//! Runtime configuration.
//!
//! Settings come from an optional TOML file, then environment variables
//! override individual fields:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SP_BASE_URL` | `base_url` |
//! | `FINANCES_BASE_URL` | `finances_base_url` |
//! | `SP_CACHE_DIR` | `cache_dir` |
//! | `SP_CONCURRENCY` | `concurrency` |
//! | `SP_TIMEOUT` | `timeout_seconds` |
//! | `SP_CACHE_TTL` | `cache_ttl_seconds` |
//! | `SP_USER_AGENT` | `user_agent` |
//! | `ENABLED_PROVIDERS` | `enabled_providers` (comma separated) |
//! | `PROVIDER_PRIORITIES` | `provider_priorities` (`id:prio,…`) |
//!
//! ```toml
//! base_url = "https://service-public.bj/"
//! concurrency = 4
//! enabled_providers = ["service-public-bj"]
//!
//! [provider_priorities]
//! "finances-bj" = 120
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted request timeout, in seconds.
pub const MAX_TIMEOUT_SECONDS: f64 = 3600.0;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_finances_base_url")]
    pub finances_base_url: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Maximum concurrent live fetches per provider.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Response cache lifetime; `0` disables caching.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_enabled_providers")]
    pub enabled_providers: Vec<String>,
    #[serde(default)]
    pub provider_priorities: BTreeMap<String, i64>,
    /// Total attempts for transient upstream failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_base_url() -> String {
    "https://service-public.bj/".to_string()
}
fn default_finances_base_url() -> String {
    "https://finances.bj/".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/registry")
}
fn default_concurrency() -> usize {
    2
}
fn default_timeout_seconds() -> f64 {
    30.0
}
fn default_cache_ttl_seconds() -> u64 {
    300
}
fn default_user_agent() -> String {
    "MCP-Service-Public-BJ/0.1".to_string()
}
fn default_enabled_providers() -> Vec<String> {
    vec!["service-public-bj".to_string(), "finances-bj".to_string()]
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            finances_base_url: default_finances_base_url(),
            cache_dir: default_cache_dir(),
            concurrency: default_concurrency(),
            timeout_seconds: default_timeout_seconds(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            user_agent: default_user_agent(),
            enabled_providers: default_enabled_providers(),
            provider_priorities: BTreeMap::new(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn snapshot_path(&self) -> PathBuf {
        self.cache_dir.join("registry.json")
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds.min(MAX_TIMEOUT_SECONDS))
            .unwrap_or(Duration::from_secs(MAX_TIMEOUT_SECONDS as u64))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Configured priority override for a provider, if any.
    pub fn priority_for(&self, provider_id: &str) -> Option<i64> {
        self.provider_priorities.get(provider_id).copied()
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SP_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("FINANCES_BASE_URL") {
            self.finances_base_url = v;
        }
        if let Some(v) = lookup("SP_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SP_CONCURRENCY") {
            self.concurrency = v
                .trim()
                .parse()
                .with_context(|| format!("SP_CONCURRENCY must be an integer, got '{}'", v))?;
        }
        if let Some(v) = lookup("SP_TIMEOUT") {
            self.timeout_seconds = v
                .trim()
                .parse()
                .with_context(|| format!("SP_TIMEOUT must be a number, got '{}'", v))?;
        }
        if let Some(v) = lookup("SP_CACHE_TTL") {
            self.cache_ttl_seconds = v
                .trim()
                .parse()
                .with_context(|| format!("SP_CACHE_TTL must be an integer, got '{}'", v))?;
        }
        if let Some(v) = lookup("SP_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("ENABLED_PROVIDERS") {
            self.enabled_providers = parse_provider_list(&v);
        }
        if let Some(v) = lookup("PROVIDER_PRIORITIES") {
            self.provider_priorities = parse_priorities(&v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be >= 1");
        }
        if !(self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0) {
            anyhow::bail!("timeout_seconds must be > 0");
        }
        if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            anyhow::bail!(
                "timeout_seconds must be <= {}, got {}",
                MAX_TIMEOUT_SECONDS,
                self.timeout_seconds
            );
        }
        if self.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be >= 1");
        }
        for (name, url) in [
            ("base_url", &self.base_url),
            ("finances_base_url", &self.finances_base_url),
        ] {
            let parsed = reqwest::Url::parse(url)
                .with_context(|| format!("{} is not a valid URL: '{}'", name, url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("{} must be an http(s) URL, got '{}'", name, url);
            }
        }
        Ok(())
    }
}

/// Split a comma-separated provider list, dropping blanks.
pub fn parse_provider_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `id:priority,…`; malformed items are skipped.
pub fn parse_priorities(value: &str) -> BTreeMap<String, i64> {
    let mut priorities = BTreeMap::new();
    for item in value.split(',') {
        let Some((id, prio)) = item.trim().split_once(':') else {
            continue;
        };
        let (id, prio) = (id.trim(), prio.trim());
        if id.is_empty() || prio.is_empty() {
            continue;
        }
        if let Ok(prio) = prio.parse::<i64>() {
            priorities.insert(id.to_string(), prio);
        }
    }
    priorities
}

/// Load configuration from `path` (if it exists) plus process environment.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

pub fn load_config_with_env<F>(path: &Path, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    config.apply_env(lookup)?;
    config.validate()?;
    Ok(config)
}
