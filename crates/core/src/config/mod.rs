//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WAYPOST_*)
//! 2. TOML config file (if WAYPOST_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The manifests (precache list, dynamic URL patterns, network-only paths)
//! are read-only inputs and live here too, so the engine never holds
//! ambient globals.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WAYPOST_*)
/// 2. TOML config file (if WAYPOST_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache database.
    ///
    /// Set via WAYPOST_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Process generation token; changes with every engine build.
    ///
    /// Set via WAYPOST_ENGINE_VERSION environment variable.
    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    /// Prefix shared by every cache generation this engine owns.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Origin whose assets are served; relative manifest entries resolve
    /// against it.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// User-Agent string for upstream requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream fetch timeout in milliseconds.
    ///
    /// Set via WAYPOST_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body size kept in memory per fetch.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Path prefix of the upstream API on the origin.
    #[serde(default = "default_api_path_prefix")]
    pub api_path_prefix: String,

    /// Hosts of the upstream compute functions (matched with subdomains).
    #[serde(default = "default_api_hosts")]
    pub api_hosts: Vec<String>,

    /// First-party static content hosts such as font and CDN hosts.
    #[serde(default = "default_static_hosts")]
    pub static_hosts: Vec<String>,

    /// Must-have assets fetched into the static generation on install.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Regular expressions over the full URL selecting API traffic.
    #[serde(default = "default_dynamic_patterns")]
    pub dynamic_patterns: Vec<String>,

    /// Paths (or absolute URL prefixes) never served from cache.
    #[serde(default = "default_network_only")]
    pub network_only: Vec<String>,

    /// Page served to navigations when both cache and network fail.
    #[serde(default = "default_offline_fallback")]
    pub offline_fallback: Option<String>,

    /// Background sync tag that triggers deferred-write replay.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// Take over immediately after a successful install.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Where a "view" notification click opens the application.
    #[serde(default = "default_results_url")]
    pub results_url: String,

    /// Where any other notification interaction opens the application.
    #[serde(default = "default_default_url")]
    pub default_url: String,

    /// Maximum concurrent fetches while installing.
    #[serde(default = "default_install_concurrency")]
    pub install_concurrency: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./waypost-cache.sqlite")
}

fn default_engine_version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

fn default_cache_prefix() -> String {
    "waypost-".into()
}

fn default_origin() -> String {
    "http://localhost:5000".into()
}

fn default_user_agent() -> String {
    "waypost/0.1".into()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_api_path_prefix() -> String {
    "/api/".into()
}

fn default_api_hosts() -> Vec<String> {
    vec!["cloudfunctions.net".into()]
}

fn default_static_hosts() -> Vec<String> {
    vec![
        "fonts.googleapis.com".into(),
        "fonts.gstatic.com".into(),
        "cdnjs.cloudflare.com".into(),
        "cdn.jsdelivr.net".into(),
    ]
}

fn default_precache() -> Vec<String> {
    vec![
        "/".into(),
        "/index.html".into(),
        "/styles.css".into(),
        "/app.js".into(),
        "/manifest.json".into(),
        "/offline.html".into(),
    ]
}

fn default_dynamic_patterns() -> Vec<String> {
    vec![r"/api/".into(), r"\.cloudfunctions\.net/".into()]
}

fn default_network_only() -> Vec<String> {
    vec!["/__/auth/".into(), "/api/health".into()]
}

fn default_offline_fallback() -> Option<String> {
    Some("/offline.html".into())
}

fn default_sync_tag() -> String {
    "document-generation".into()
}

fn default_true() -> bool {
    true
}

fn default_results_url() -> String {
    "/?view=results".into()
}

fn default_default_url() -> String {
    "/".into()
}

fn default_install_concurrency() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            engine_version: default_engine_version(),
            cache_prefix: default_cache_prefix(),
            origin: default_origin(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            api_path_prefix: default_api_path_prefix(),
            api_hosts: default_api_hosts(),
            static_hosts: default_static_hosts(),
            precache: default_precache(),
            dynamic_patterns: default_dynamic_patterns(),
            network_only: default_network_only(),
            offline_fallback: default_offline_fallback(),
            sync_tag: default_sync_tag(),
            skip_waiting: true,
            results_url: default_results_url(),
            default_url: default_default_url(),
            install_concurrency: default_install_concurrency(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Name of the current static generation.
    pub fn static_cache_name(&self) -> String {
        format!("{}static-{}", self.cache_prefix, self.engine_version)
    }

    /// Name of the current dynamic generation.
    pub fn dynamic_cache_name(&self) -> String {
        format!("{}dynamic-{}", self.cache_prefix, self.engine_version)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WAYPOST_`
    /// 2. TOML file from `WAYPOST_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WAYPOST_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WAYPOST_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
