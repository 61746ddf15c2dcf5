//! Application configuration management.
//!
//! Holds the origin the bj-trainer app is served from plus proxy overrides.
//! Stored at `~/.config/cardcache/config.json`; `CARDCACHE_ORIGIN` in the
//! environment (or a `.env` file) overrides the origin.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cardcache_core::{ProxyConfig, Url, ASSETS, CACHE_NAME};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "cardcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the configured origin
const ORIGIN_ENV: &str = "CARDCACHE_ORIGIN";

/// Origin used when nothing is configured
const DEFAULT_ORIGIN: &str = "http://localhost:8000/";

/// HTTP request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub origin: String,
    pub cache_name: String,
    pub assets: Vec<String>,
    pub request_timeout_secs: u64,
    pub purge_stale_caches: bool,
    pub log_to_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache_name: CACHE_NAME.to_string(),
            assets: ASSETS.iter().map(|s| s.to_string()).collect(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            purge_stale_caches: false,
            log_to_file: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            config.origin = origin;
        }
        Ok(config)
    }

    /// Write the config, returning where it went
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// The app scope: the origin, with a trailing slash so relative asset
    /// paths resolve inside it.
    pub fn scope(&self) -> Result<Url> {
        let mut origin = self.origin.clone();
        if !origin.ends_with('/') {
            origin.push('/');
        }
        Url::parse(&origin)
            .with_context(|| format!("Invalid origin URL: {}", self.origin))
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        Ok(ProxyConfig::new(self.scope()?)
            .with_cache_name(self.cache_name.clone())
            .with_assets(self.assets.clone())
            .with_purge_stale_caches(self.purge_stale_caches))
    }
}
