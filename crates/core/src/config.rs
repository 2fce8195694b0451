//! Service configuration.
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. TOML file passed on the command line
//! 3. Environment variables: `CGN_*`
//!
//! # Example Config
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [engine]
//! notification_delay_ms = 2000
//! notifiable_statuses = ["ACTIVATED", "REVOKED"]
//!
//! [retry]
//! first_interval_ms = 1000
//! backoff_coefficient = 2.0
//! max_attempts = 5
//!
//! [storage]
//! url = "mem://"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::card::StatusTag;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineSettings,
    pub retry: RetrySettings,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP API listens on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Delay before the success notification is sent.
    pub notification_delay_ms: u64,
    /// Delay before the error notification of the compensation path.
    pub error_notification_delay_ms: u64,
    /// How long terminal instances are kept before purge.
    pub retention_hours: u64,
    /// How often the host sweeps expired instances.
    pub purge_interval_secs: u64,
    /// Upper bound on instances executing at once.
    pub max_concurrent: usize,
    /// Target statuses that trigger a holder notification.
    pub notifiable_statuses: Vec<StatusTag>,
    /// Holders strictly younger than this qualify for the EYCA card.
    pub eyca_age_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            notification_delay_ms: 2_000,
            error_notification_delay_ms: 2_000,
            retention_hours: 72,
            purge_interval_secs: 3_600,
            max_concurrent: 64,
            notifiable_statuses: vec![StatusTag::Activated, StatusTag::Revoked],
            eyca_age_limit: 31,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub first_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub max_attempts: u32,
    pub max_interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            first_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            max_attempts: 5,
            max_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` for the process-local store, or a SurrealDB endpoint
    /// (`mem://`, `ws://host:port`).
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            namespace: "cgn".to_string(),
            database: "workflows".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from defaults, an optional TOML file, and the environment.
///
/// # Errors
///
/// Returns error if:
/// - The file cannot be read or is malformed TOML
/// - An environment override cannot be parsed
/// - The resulting values fail validation
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_toml_file(path)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn load_toml_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    parse_toml(&content)
}

/// Parse a TOML document into a config.
///
/// # Errors
///
/// Returns `TomlParseFailed` on malformed input.
pub fn parse_toml(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::TomlParseFailed {
        reason: e.to_string(),
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("invalid {key} value '{value}': {e}")))
}

impl Config {
    /// Apply `CGN_*` overrides using the given variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a value cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CGN_BIND") {
            self.server.bind = value;
        }
        if let Some(value) = lookup("CGN_STORAGE_URL") {
            self.storage.url = value;
        }
        if let Some(value) = lookup("CGN_NOTIFICATION_DELAY_MS") {
            self.engine.notification_delay_ms = parse_env("CGN_NOTIFICATION_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("CGN_ERROR_NOTIFICATION_DELAY_MS") {
            self.engine.error_notification_delay_ms =
                parse_env("CGN_ERROR_NOTIFICATION_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("CGN_RETENTION_HOURS") {
            self.engine.retention_hours = parse_env("CGN_RETENTION_HOURS", &value)?;
        }
        if let Some(value) = lookup("CGN_MAX_CONCURRENT") {
            self.engine.max_concurrent = parse_env("CGN_MAX_CONCURRENT", &value)?;
        }
        if let Some(value) = lookup("CGN_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("CGN_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("CGN_RETRY_FIRST_INTERVAL_MS") {
            self.retry.first_interval_ms = parse_env("CGN_RETRY_FIRST_INTERVAL_MS", &value)?;
        }
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.backoff_coefficient < 1.0 {
            return Err(Error::InvalidConfig(
                "retry.backoff_coefficient must be >= 1.0".into(),
            ));
        }
        if self.engine.max_concurrent == 0 {
            return Err(Error::InvalidConfig("engine.max_concurrent must be at least 1".into()));
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "server.bind '{}' is not a socket address",
                self.server.bind
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = parse_toml(
            r#"
            [engine]
            notification_delay_ms = 10
            notifiable_statuses = ["REVOKED"]
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.notification_delay_ms, 10);
        assert_eq!(config.engine.notifiable_statuses, vec![StatusTag::Revoked]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.storage.url, "memory");
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            parse_toml("[engine\nbroken"),
            Err(Error::TomlParseFailed { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CGN_BIND", "0.0.0.0:9000"),
            ("CGN_RETRY_MAX_ATTEMPTS", "7"),
            ("CGN_STORAGE_URL", "mem://"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.storage.url, "mem://");
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = Config::default();
        let result = config.apply_env(|key| {
            (key == "CGN_RETRY_MAX_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
