//! Configuration module for Kura Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation of the upload tuning knobs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::{expand_env_vars, ConfigLoader};

/// Store-imposed minimum size of every part but the last (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Store-imposed maximum part size (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Longest validity a presigned authorization may carry (7 days)
pub const MAX_AUTHORIZATION_TTL_SECS: u64 = 7 * 24 * 3600;

/// Upper bound on the per-session worker pool width
pub const MAX_CONCURRENT_PARTS: usize = 64;

/// Upper bound on retries per part
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.address cannot be empty".into(),
            ));
        }

        self.store.validate()?;
        self.upload.validate()?;
        self.logging.validate()?;

        if self.metrics.enabled && self.metrics.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "metrics.address cannot be empty when metrics are enabled".into(),
            ));
        }

        Ok(())
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Backing object store configuration
///
/// One shared bucket holds every organization's objects; tenants are
/// separated by key prefix, not by bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Path-style addressing, needed by most S3-compatible servers
    #[serde(default)]
    pub force_path_style: bool,
}

impl StoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "store.bucket cannot be empty".into(),
            ));
        }

        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "store.region cannot be empty".into(),
            ));
        }

        if let Some(ref endpoint) = self.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid store endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::ValidationError(
                "store.access_key and store.secret_key must be set together".into(),
            ));
        }

        Ok(())
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Large-object upload tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default = "default_concurrent_parts")]
    pub concurrent_parts: usize,
    #[serde(default = "default_authorization_ttl_secs")]
    pub authorization_ttl_secs: u64,
    #[serde(default = "default_authorization_refresh_margin_secs")]
    pub authorization_refresh_margin_secs: u64,
    /// Retries after the first attempt; a part gets `1 + max_retries` attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            concurrent_parts: default_concurrent_parts(),
            authorization_ttl_secs: default_authorization_ttl_secs(),
            authorization_refresh_margin_secs: default_authorization_refresh_margin_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl UploadConfig {
    /// Validate the upload settings against the object store limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "upload.part_size {} is below the store minimum of {} bytes",
                self.part_size, MIN_PART_SIZE
            )));
        }

        if self.part_size > MAX_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "upload.part_size {} exceeds the store maximum of {} bytes",
                self.part_size, MAX_PART_SIZE
            )));
        }

        if self.concurrent_parts == 0 || self.concurrent_parts > MAX_CONCURRENT_PARTS {
            return Err(ConfigError::ValidationError(format!(
                "upload.concurrent_parts must be between 1 and {}, got {}",
                MAX_CONCURRENT_PARTS, self.concurrent_parts
            )));
        }

        if self.authorization_ttl_secs == 0
            || self.authorization_ttl_secs > MAX_AUTHORIZATION_TTL_SECS
        {
            return Err(ConfigError::ValidationError(format!(
                "upload.authorization_ttl_secs must be between 1 and {}, got {}",
                MAX_AUTHORIZATION_TTL_SECS, self.authorization_ttl_secs
            )));
        }

        if self.authorization_refresh_margin_secs >= self.authorization_ttl_secs {
            return Err(ConfigError::ValidationError(
                "upload.authorization_refresh_margin_secs must be shorter than the authorization ttl"
                    .into(),
            ));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "upload.max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, self.max_retries
            )));
        }

        Ok(())
    }

    pub fn authorization_ttl(&self) -> Duration {
        Duration::from_secs(self.authorization_ttl_secs)
    }

    pub fn authorization_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.authorization_refresh_margin_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_part_size() -> u64 {
    MIN_PART_SIZE
}

fn default_concurrent_parts() -> usize {
    3
}

fn default_authorization_ttl_secs() -> u64 {
    3600
}

fn default_authorization_refresh_margin_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
///
/// `RUST_LOG` takes precedence over `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}': must be trace, debug, info, warn or error",
                other
            ))),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StoreConfig {
        StoreConfig {
            bucket: "files".into(),
            region: "us-east-1".into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            force_path_style: false,
        }
    }

    fn config() -> Config {
        Config {
            server: ServerConfig::default(),
            store: store(),
            upload: UploadConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_default_upload_config() {
        let upload = UploadConfig::default();
        assert_eq!(upload.part_size, 5 * 1024 * 1024);
        assert_eq!(upload.concurrent_parts, 3);
        assert_eq!(upload.authorization_ttl(), Duration::from_secs(3600));
        assert_eq!(upload.max_retries, 3);
        assert!(upload.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_part_size_below_minimum_rejected() {
        let mut config = config();
        config.upload.part_size = MIN_PART_SIZE - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = config();
        config.upload.concurrent_parts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_margin_must_be_shorter_than_ttl() {
        let mut config = config();
        config.upload.authorization_ttl_secs = 30;
        config.upload.authorization_refresh_margin_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_configured_credentials_rejected() {
        let mut config = config();
        config.store.access_key = Some("AKIA".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let mut config = config();
        config.store.endpoint = Some("localhost:9000".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = config();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());
    }
}
