use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::cache::ResponseCache;
use crate::client::{ClientSettings, DEFAULT_BASE_URL};
use crate::download::DEFAULT_BLOCK_SIZE;
use crate::error::EncodeError;

pub const CONFIG_FILE: &str = "encode-query.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub cache: Option<CacheEntry>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub block_size: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CacheEntry {
    Enabled(bool),
    Detailed(CacheEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CacheEntryObject {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub client: ClientSettings,
    pub cache_enabled: bool,
    pub cache_dir: Option<Utf8PathBuf>,
    pub workers: Option<usize>,
    pub block_size: usize,
}

impl ResolvedConfig {
    /// Response cache rooted at the configured directory, or the user cache home.
    pub fn response_cache(&self) -> Result<ResponseCache, EncodeError> {
        match &self.cache_dir {
            Some(dir) => Ok(ResponseCache::new_with_root(dir.clone())),
            None => ResponseCache::new(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `encode-query.json` in the working directory when present.
    /// An explicit path must exist; the implicit file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EncodeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EncodeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EncodeError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EncodeError> {
        let defaults = ClientSettings::default();
        let base_url = config
            .base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(EncodeError::ConfigParse(format!(
                "base_url must be an http(s) URL, got {base_url:?}"
            )));
        }

        let (cache_enabled, cache_dir) = match config.cache {
            None => (true, None),
            Some(CacheEntry::Enabled(enabled)) => (enabled, None),
            Some(CacheEntry::Detailed(obj)) => (obj.enabled, obj.dir.map(Utf8PathBuf::from)),
        };

        let block_size = config.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
        if block_size == 0 {
            return Err(EncodeError::ConfigParse(
                "block_size must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            client: ClientSettings {
                base_url,
                timeout: config
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
                user_agent: config.user_agent.unwrap_or(defaults.user_agent),
            },
            cache_enabled,
            cache_dir,
            workers: config.workers.filter(|workers| *workers > 0),
            block_size,
        })
    }
}
