use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WikiError};

pub const DEFAULT_USER_AGENT: &str = "wikiquery/0.1";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
}

impl WikiConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        self.api_url_with(env_lookup)
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        self.user_agent_with(env_lookup)
    }

    fn api_url_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        lookup("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    fn user_agent_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        lookup("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path).map_err(|error| {
        WikiError::config(format!("failed to read {}: {error}", config_path.display()))
    })?;
    toml::from_str(&content).map_err(|error| {
        WikiError::config(format!("failed to parse {}: {error}", config_path.display()))
    })
}

/// Settings for `HttpTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            rate_limit_read_ms: 300,
            rate_limit_write_ms: 1_000,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_config(&WikiConfig::default())
    }

    pub fn from_config(config: &WikiConfig) -> Self {
        Self::resolve(config, env_lookup)
    }

    fn resolve(config: &WikiConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_url: config.api_url_with(&lookup).unwrap_or(defaults.api_url),
            user_agent: config.user_agent_with(&lookup),
            timeout_ms: parsed(&lookup, "WIKI_HTTP_TIMEOUT_MS", defaults.timeout_ms),
            rate_limit_read_ms: parsed(&lookup, "WIKI_RATE_LIMIT_READ", defaults.rate_limit_read_ms),
            rate_limit_write_ms: parsed(
                &lookup,
                "WIKI_RATE_LIMIT_WRITE",
                defaults.rate_limit_write_ms,
            ),
            max_retries: parsed(&lookup, "WIKI_HTTP_RETRIES", defaults.max_retries),
            max_write_retries: parsed(&lookup, "WIKI_HTTP_WRITE_RETRIES", defaults.max_write_retries),
            retry_delay_ms: parsed(&lookup, "WIKI_HTTP_RETRY_DELAY_MS", defaults.retry_delay_ms),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// WIKI_USERNAME (or `[wiki] username`) plus WIKI_PASSWORD. `None` when either is unset.
    pub fn from_env(config: &WikiConfig) -> Option<Self> {
        Self::resolve(config, env_lookup)
    }

    fn resolve(config: &WikiConfig, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let username = lookup("WIKI_USERNAME").or_else(|| config.wiki.username.clone())?;
        let password = lookup("WIKI_PASSWORD")?;
        Some(Self { username, password })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}
