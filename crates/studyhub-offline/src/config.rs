//! The `[offline]` section of `studyhub.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use studyhub_core::config::{read_config_file, resolve_env_vars};

use crate::cache::CacheManifest;

/// Cache synchronizer and update-check settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Every generation this app owns is named `{cache_prefix}{version}`.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,
    #[serde(default)]
    pub quiz_data: Vec<String>,
    /// Served to navigations (and bank requests) when offline and uncached.
    #[serde(default = "default_offline_fallback")]
    pub offline_fallback: String,
    #[serde(default = "default_version_url")]
    pub version_url: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_force_refresh_delay")]
    pub force_refresh_delay_secs: u64,
    #[serde(default = "default_true")]
    pub revalidate_on_hit: bool,
    /// Fail the install when any static asset fails to download.
    #[serde(default)]
    pub strict_static: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_first_prefixes")]
    pub cache_first_prefixes: Vec<String>,
    #[serde(default = "default_cache_first_extensions")]
    pub cache_first_extensions: Vec<String>,
    #[serde(default = "default_network_only_prefixes")]
    pub network_only_prefixes: Vec<String>,
}

fn default_cache_prefix() -> String {
    "studyhub-".to_string()
}
fn default_version() -> String {
    "v1".to_string()
}
fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_static_assets() -> Vec<String> {
    [
        "/",
        "/static/style.css",
        "/static/quiz-style.css",
        "/static/quiz-script.js",
        "/static/js/pwa-utils.js",
        "/static/manifest.json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_offline_fallback() -> String {
    "/".to_string()
}
fn default_version_url() -> String {
    "/version.json".to_string()
}
fn default_check_interval() -> u64 {
    30 * 60
}
fn default_force_refresh_delay() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_request_timeout() -> u64 {
    30
}
fn default_cache_first_prefixes() -> Vec<String> {
    vec!["/static/".to_string(), "/modules/".to_string()]
}
fn default_cache_first_extensions() -> Vec<String> {
    [".json", ".png", ".jpg", ".ico"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_network_only_prefixes() -> Vec<String> {
    vec!["/api/".to_string()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_prefix: default_cache_prefix(),
            version: default_version(),
            base_url: default_base_url(),
            static_assets: default_static_assets(),
            quiz_data: Vec::new(),
            offline_fallback: default_offline_fallback(),
            version_url: default_version_url(),
            check_interval_secs: default_check_interval(),
            force_refresh_delay_secs: default_force_refresh_delay(),
            revalidate_on_hit: true,
            strict_static: false,
            request_timeout_secs: default_request_timeout(),
            cache_first_prefixes: default_cache_first_prefixes(),
            cache_first_extensions: default_cache_first_extensions(),
            network_only_prefixes: default_network_only_prefixes(),
        }
    }
}

impl SyncConfig {
    pub fn cache_name(&self, version: &str) -> String {
        format!("{}{}", self.cache_prefix, version)
    }

    /// Manifest for the configured version.
    pub fn manifest(&self) -> CacheManifest {
        CacheManifest {
            version: self.version.clone(),
            static_assets: self.static_assets.clone(),
            quiz_data: self.quiz_data.clone(),
        }
    }

    /// Strip the base URL so absolute and relative requests share cache keys.
    pub fn cache_key<'a>(&self, url: &'a str) -> &'a str {
        let base = self.base_url.trim_end_matches('/');
        match url.strip_prefix(base) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => url,
        }
    }

    pub fn is_network_only(&self, key: &str) -> bool {
        self.network_only_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Static assets and question banks: served cache-first.
    pub fn is_cache_first(&self, key: &str) -> bool {
        let path = key.split('?').next().unwrap_or(key);
        self.static_assets.iter().any(|a| a == key && a != "/")
            || self.quiz_data.iter().any(|q| q == key)
            || self.cache_first_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.cache_first_extensions.iter().any(|e| path.ends_with(e.as_str()))
    }

    pub fn is_quiz_data(&self, key: &str) -> bool {
        let path = key.split('?').next().unwrap_or(key);
        self.quiz_data.iter().any(|q| q == key) || (path.starts_with("/modules/") && path.ends_with(".json"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    offline: SyncConfig,
}

pub fn load_sync_config() -> Result<SyncConfig> {
    load_sync_config_from(None)
}

/// Load the `[offline]` section from an explicit path, or search the
/// default locations.
///
/// Environment variable overrides: `STUDYHUB_BASE_URL`, `STUDYHUB_CACHE_VERSION`.
pub fn load_sync_config_from(path: Option<&Path>) -> Result<SyncConfig> {
    let mut config = match read_config_file(path)? {
        Some((path, content)) => {
            toml::from_str::<ConfigFile>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
                .offline
        }
        None => SyncConfig::default(),
    };

    if let Ok(url) = std::env::var("STUDYHUB_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(version) = std::env::var("STUDYHUB_CACHE_VERSION") {
        config.version = version;
    }

    config.base_url = resolve_env_vars(&config.base_url);
    config.version = resolve_env_vars(&config.version);
    config.version_url = resolve_env_vars(&config.version_url);

    Ok(config)
}
