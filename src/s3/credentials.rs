//! S3 Credentials Module
//!
//! Resolves static credentials for the gateway. When none are configured the
//! gateway falls back to the AWS default provider chain.

use crate::config::StoreConfig;
use aws_credential_types::Credentials;
use thiserror::Error;

const PROVIDER_NAME: &str = "kura-uploadr";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Factory for static AWS credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    /// - `AWS_SESSION_TOKEN` (optional)
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Self::build(access_key, secret_key, session_token)
    }

    /// Load credentials from the store configuration
    ///
    /// Returns `Ok(None)` when the configuration carries no static keys.
    pub fn from_config(config: &StoreConfig) -> Result<Option<Credentials>, CredentialsError> {
        match (&config.access_key, &config.secret_key) {
            (None, None) => Ok(None),
            (Some(access_key), Some(secret_key)) => {
                Self::build(access_key.clone(), secret_key.clone(), None).map(Some)
            }
            (Some(_), None) => Err(CredentialsError::MissingCredentials(
                "secret_key not set in config".into(),
            )),
            (None, Some(_)) => Err(CredentialsError::MissingCredentials(
                "access_key not set in config".into(),
            )),
        }
    }

    fn build(
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
    ) -> Result<Credentials, CredentialsError> {
        if access_key.trim().is_empty() || secret_key.trim().is_empty() {
            return Err(CredentialsError::InvalidCredentials(
                "access key and secret key cannot be empty".into(),
            ));
        }

        Ok(Credentials::new(
            access_key,
            secret_key,
            session_token,
            None,
            PROVIDER_NAME,
        ))
    }
}
