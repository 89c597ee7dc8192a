//! Configuration validation rules.
//!
//! Checks applied to `AppConfig` after it has been loaded from environment,
//! files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` or `push.public_key` is empty
    /// - `base_url` or `upstream_url` is not an http(s) URL
    /// - a server path does not start with `/`
    /// - `store_path` is the same file as `db_path`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        for (field, value) in [("base_url", &self.base_url), ("upstream_url", &self.upstream_url)] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be an http(s) URL".into() });
            }
        }

        for (field, value) in [
            ("push.subscription_path", &self.push.subscription_path),
            ("sync.delivery_path", &self.sync.delivery_path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must start with '/'".into() });
            }
        }

        if self.push.public_key.is_empty() {
            return Err(ConfigError::Invalid { field: "push.public_key".into(), reason: "must not be empty".into() });
        }

        // Both databases track schema versions in one `_migrations` table.
        if self.db_path == self.store_path {
            return Err(ConfigError::Invalid {
                field: "store_path".into(),
                reason: format!("must differ from db_path ({})", self.db_path.display()),
            });
        }

        Ok(())
    }
}
