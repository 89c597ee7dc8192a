//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SHELF_*, nested with `__`)
//! 2. The bare `PORT` variable for the proxy port
//! 3. TOML config file (if SHELF_CONFIG_FILE set)
//! 4. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::push::PermissionState;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL the client resolves request keys against.
    ///
    /// Set via SHELF_BASE_URL environment variable.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path to the SQLite HTTP response cache.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Path to the SQLite persistent local store (sync payloads).
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Network timeout in milliseconds.
    ///
    /// Set via SHELF_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Listen port of the proxy server. `PORT` is honored as well.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the third-party search API the proxy forwards to.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Directory served as static assets by the proxy.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub push: PushSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub links: LinkSettings,
}

/// Query orchestration settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Drop network results that belong to a superseded query.
    #[serde(default)]
    pub discard_stale: bool,
}

/// Push subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    /// Application server public key (URL-safe base64).
    #[serde(default = "default_public_key")]
    pub public_key: String,

    /// Script the background execution context is registered from.
    #[serde(default = "default_script_path")]
    pub script_path: String,

    /// Path subscriptions are submitted to.
    #[serde(default = "default_subscription_path")]
    pub subscription_path: String,

    /// Permission answer given by the headless platform.
    #[serde(default)]
    pub permission: PermissionState,

    /// JSON file holding the subscription descriptor for the headless platform.
    #[serde(default)]
    pub subscription_file: Option<PathBuf>,
}

/// Background sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Path deferred sync payloads are delivered to.
    #[serde(default = "default_delivery_path")]
    pub delivery_path: String,
}

/// Navigation targets of the notification actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_book_page")]
    pub book_page: String,

    #[serde(default = "default_contact")]
    pub contact: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8085".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./shelf-cache.sqlite")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./shelf-store.sqlite")
}

fn default_user_agent() -> String {
    "shelf/0.1".into()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_port() -> u16 {
    8085
}

fn default_upstream_url() -> String {
    "https://api.douban.com/v2".into()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./public")
}

fn default_public_key() -> String {
    "BOEQSjdhorIf8M0XFNlwohK3sTzO9iJwvbYU-fuXRF0tvRpPPMGO6d_gJC_pUQwBT7wD8rKutpNTFHOHN3VqJ0A".into()
}

fn default_script_path() -> String {
    "./sw.js".into()
}

fn default_subscription_path() -> String {
    "/subscription".into()
}

fn default_delivery_path() -> String {
    "/sync".into()
}

fn default_book_page() -> String {
    "https://book.douban.com/subject/20515024/".into()
}

fn default_contact() -> String {
    "mailto:someone@sample.com".into()
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            public_key: default_public_key(),
            script_path: default_script_path(),
            subscription_path: default_subscription_path(),
            permission: PermissionState::Default,
            subscription_file: None,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { delivery_path: default_delivery_path() }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self { book_page: default_book_page(), contact: default_contact() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            db_path: default_db_path(),
            store_path: default_store_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            port: default_port(),
            upstream_url: default_upstream_url(),
            static_dir: default_static_dir(),
            search: SearchSettings::default(),
            push: PushSettings::default(),
            sync: SyncSettings::default(),
            links: LinkSettings::default(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SHELF_`
    /// 2. `PORT`
    /// 3. TOML file from `SHELF_CONFIG_FILE` (if set)
    /// 4. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    /// The layered figment `load` extracts from.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SHELF_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment
            .merge(Env::raw().only(&["port"]))
            .merge(
                Env::prefixed("SHELF_")
                    .ignore(&["config_file"])
                    .map(|key| key.as_str().to_lowercase().into())
                    .split("__"),
            )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Resolve a server path against `base_url`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
