//! Part transport
//!
//! Moves one part's bytes to the store with a presigned authorization and
//! hands back the store's content hash for that part.

use crate::s3::PartAuthorization;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, ETAG};
use std::time::Duration;
use thiserror::Error;

/// Longest store error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Part transfer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Store responded with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid content hash: {0}")]
    Integrity(String),
}

impl TransferError {
    /// Whether another attempt at the same part may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Network(_) | TransferError::Integrity(_) => true,
            TransferError::Status { status, .. } => {
                *status == 403 || *status == 408 || *status == 429 || *status >= 500
            }
        }
    }

    /// A 403 from a presigned URL means the signature is no longer accepted
    pub fn requires_fresh_authorization(&self) -> bool {
        matches!(self, TransferError::Status { status: 403, .. })
    }
}

/// Transfers part bodies to presigned URLs
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// Upload `body` and return the part's content hash
    async fn put_part(
        &self,
        authorization: &PartAuthorization,
        body: Bytes,
    ) -> Result<String, TransferError>;
}

/// Normalize a returned content hash: surrounding quotes are dropped and an
/// absent or blank value is an integrity failure.
pub fn normalize_etag(raw: &str) -> Result<String, TransferError> {
    let etag = raw.trim().trim_matches('"').trim();
    if etag.is_empty() {
        return Err(TransferError::Integrity("empty ETag".into()));
    }
    if etag.contains('"') {
        return Err(TransferError::Integrity(format!("malformed ETag {}", raw)));
    }
    Ok(etag.to_string())
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpPartTransport {
    client: reqwest::Client,
}

impl HttpPartTransport {
    /// Create a transport with its own connection pool
    pub fn new(connect_timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransferError::Network(e.to_string()))?;

        Ok(Self { client })
    }

    /// Reuse an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PartTransport for HttpPartTransport {
    #[tracing::instrument(
        name = "upload.part.put",
        skip(self, authorization, body),
        fields(
            part_number = authorization.part_number,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        )
    )]
    async fn put_part(
        &self,
        authorization: &PartAuthorization,
        body: Bytes,
    ) -> Result<String, TransferError> {
        let response = self
            .client
            .put(&authorization.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown status").to_string()
            } else {
                body.chars().take(MAX_ERROR_BODY).collect()
            };
            return Err(TransferError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let raw = response
            .headers()
            .get(ETAG)
            .ok_or_else(|| TransferError::Integrity("response carried no ETag".into()))?
            .to_str()
            .map_err(|_| TransferError::Integrity("ETag is not valid ASCII".into()))?;

        normalize_etag(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_quotes() {
        assert_eq!(normalize_etag("\"abc123\"").unwrap(), "abc123");
        assert_eq!(normalize_etag("abc123").unwrap(), "abc123");
        assert_eq!(
            normalize_etag(" \"9b2cf535f27731c974343645a3985328-3\" ").unwrap(),
            "9b2cf535f27731c974343645a3985328-3"
        );
    }

    #[test]
    fn test_normalize_rejects_blank_and_malformed() {
        assert!(normalize_etag("").is_err());
        assert!(normalize_etag("\"\"").is_err());
        assert!(normalize_etag("ab\"cd").is_err());
    }

    #[test]
    fn test_status_classification() {
        let status = |status| TransferError::Status {
            status,
            message: String::new(),
        };
        for transient in [403, 408, 429, 500, 503] {
            assert!(status(transient).is_transient(), "{transient}");
        }
        for fatal in [400, 404, 411] {
            assert!(!status(fatal).is_transient(), "{fatal}");
        }
        assert!(status(403).requires_fresh_authorization());
        assert!(!status(503).requires_fresh_authorization());
        assert!(TransferError::Network("reset".into()).is_transient());
    }
}
