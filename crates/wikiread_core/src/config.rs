use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://api.wikimedia.org/core/v1/wikipedia/en/";
pub const DEFAULT_AUTH_URL: &str = "https://meta.wikimedia.org/w/rest.php/oauth2/access_token";
pub const DEFAULT_RANDOM_URL: &str = "https://en.wikipedia.org/wiki/Special:Random";
pub const DEFAULT_USER_AGENT: &str = concat!("wikiread/", env!("CARGO_PKG_VERSION"));

pub const ENV_CLIENT_ID: &str = "WM_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "WM_CLIENT_SECRET";
pub const ENV_DEBUG: &str = "DEBUG";

/// Source of environment values. Production code passes [`process_env`];
/// tests pass a closure over a fixed map.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    #[serde(default)]
    pub wikipedia: WikipediaSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikipediaSection {
    pub api_url: Option<String>,
    pub auth_url: Option<String>,
    pub random_url: Option<String>,
    pub user_agent: Option<String>,
}

impl ReaderConfig {
    /// REST API base: env WIKIREAD_API_URL > config > DEFAULT_API_URL.
    /// Always ends with `/` so relative endpoint paths join beneath it.
    pub fn api_url(&self, env: EnvLookup) -> String {
        let value = resolve(
            env,
            "WIKIREAD_API_URL",
            self.wikipedia.api_url.as_deref(),
            DEFAULT_API_URL,
        );
        if value.ends_with('/') {
            value
        } else {
            format!("{value}/")
        }
    }

    /// OAuth2 token endpoint: env WIKIREAD_AUTH_URL > config > DEFAULT_AUTH_URL.
    pub fn auth_url(&self, env: EnvLookup) -> String {
        resolve(
            env,
            "WIKIREAD_AUTH_URL",
            self.wikipedia.auth_url.as_deref(),
            DEFAULT_AUTH_URL,
        )
    }

    /// Random article URL: env WIKIREAD_RANDOM_URL > config > DEFAULT_RANDOM_URL.
    pub fn random_url(&self, env: EnvLookup) -> String {
        resolve(
            env,
            "WIKIREAD_RANDOM_URL",
            self.wikipedia.random_url.as_deref(),
            DEFAULT_RANDOM_URL,
        )
    }

    /// User agent: env WIKIREAD_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self, env: EnvLookup) -> String {
        resolve(
            env,
            "WIKIREAD_USER_AGENT",
            self.wikipedia.user_agent.as_deref(),
            DEFAULT_USER_AGENT,
        )
    }
}

/// `DEBUG=True` (also `true` or `1`) turns on raw response dumping.
pub fn debug_enabled(env: EnvLookup) -> bool {
    env(ENV_DEBUG)
        .map(|value| {
            let value = value.trim();
            value.eq_ignore_ascii_case("true") || value == "1"
        })
        .unwrap_or(false)
}

/// Load and parse a ReaderConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ReaderConfig> {
    if !config_path.exists() {
        return Ok(ReaderConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ReaderConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn resolve(env: EnvLookup, key: &str, configured: Option<&str>, default: &str) -> String {
    if let Some(value) = env(key) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(value) = configured {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    default.to_string()
}
