//! Logging subscriber setup
//!
//! Layers an `EnvFilter` (RUST_LOG wins over the configured level) with a fmt
//! layer writing either human-readable text or JSON lines.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during logging initialization
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(config.level.to_lowercase())
            .map_err(|e| LoggingError::InvalidFilter(e.to_string())),
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            ),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            ),
        ),
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_configured_level_used_without_rust_log() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "DEBUG".into(),
            format: LogFormat::Text,
        };
        let filter = env_filter(&config).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    #[serial_test::serial]
    fn test_rust_log_takes_precedence() {
        std::env::set_var("RUST_LOG", "kura_uploadr=trace");
        let filter = env_filter(&LoggingConfig::default()).unwrap();
        assert_eq!(filter.to_string(), "kura_uploadr=trace");
        std::env::remove_var("RUST_LOG");
    }

    #[test]
    #[serial_test::serial]
    fn test_init_twice_fails_second_time() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "info".into(),
            format: LogFormat::Json,
        };
        // Another test binary may already own the global subscriber.
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
