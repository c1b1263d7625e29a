//! Object store gateway
//!
//! A thin façade over the store's four multipart primitives plus the listing
//! collaborator used by the file browser.
//!
//! # Operations
//!
//! | Operation | Span Name | Store call |
//! |-----------|-----------|------------|
//! | `initiate_upload` | `s3.create_multipart_upload` | CreateMultipartUpload |
//! | `authorize_part_upload` | `s3.presign_upload_part` | presigned UploadPart URL (no network call) |
//! | `complete_upload` | `s3.complete_multipart_upload` | CompleteMultipartUpload |
//! | `abort_upload` | `s3.abort_multipart_upload` | AbortMultipartUpload |
//!
//! Keys are [`QualifiedKey`]s, so nothing reaches the store unless it was
//! qualified under a tenant namespace first.

use crate::namespace::{ListedObject, QualifiedKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

mod client;
pub mod credentials;

pub use client::S3Gateway;
pub use credentials::{CredentialsError, CredentialsProvider};

/// Highest part number the store accepts
pub const MAX_PARTS: u32 = 10_000;

/// Gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid part list: {0}")]
    InvalidParts(String),

    #[error("Presigning error: {0}")]
    Presign(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<CredentialsError> for GatewayError {
    fn from(e: CredentialsError) -> Self {
        GatewayError::Config(e.to_string())
    }
}

/// Time-limited permission to PUT one part's bytes straight to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartAuthorization {
    pub part_number: u32,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl PartAuthorization {
    /// Whether the authorization expires within `margin` from now
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        match (self.expires_at - Utc::now()).to_std() {
            Ok(remaining) => remaining <= margin,
            // Negative remaining time: already expired
            Err(_) => true,
        }
    }
}

/// Proof that the store durably received one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// The object produced by a completed multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub etag: Option<String>,
    pub location: Option<String>,
}

/// The store's multipart upload primitives
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// Start a multipart upload and return the store-issued upload id
    async fn initiate_upload(
        &self,
        key: &QualifiedKey,
        content_type: &str,
    ) -> Result<String, GatewayError>;

    /// Sign an intent to upload one part; performs no data transfer
    async fn authorize_part_upload(
        &self,
        upload_id: &str,
        key: &QualifiedKey,
        part_number: u32,
    ) -> Result<PartAuthorization, GatewayError>;

    /// Assemble the object from its parts, submitted in ascending part order
    async fn complete_upload(
        &self,
        upload_id: &str,
        key: &QualifiedKey,
        parts: &[CompletedPart],
    ) -> Result<ObjectDescriptor, GatewayError>;

    /// Release everything the store reserved for an unfinished upload
    async fn abort_upload(&self, upload_id: &str, key: &QualifiedKey) -> Result<(), GatewayError>;
}

/// Listing and plain object operations used by the file browser
#[async_trait]
pub trait ObjectListing: Send + Sync {
    /// Raw keys directly under `prefix`: folders first, then files
    async fn list_objects(&self, prefix: &QualifiedKey) -> Result<Vec<ListedObject>, GatewayError>;

    async fn delete_object(&self, key: &QualifiedKey) -> Result<(), GatewayError>;

    /// Create an empty placeholder object whose key ends in `/`
    async fn create_folder(&self, key: &QualifiedKey) -> Result<(), GatewayError>;

    async fn presign_download(&self, key: &QualifiedKey) -> Result<String, GatewayError>;
}

/// Order parts for submission and check that they form a gap-free set.
///
/// The store defines part order by this sort, never by arrival order.
pub fn prepare_completion(parts: &[CompletedPart]) -> Result<Vec<CompletedPart>, GatewayError> {
    if parts.is_empty() {
        return Err(GatewayError::InvalidParts("no parts to complete".into()));
    }

    let mut ordered = parts.to_vec();
    ordered.sort_by_key(|p| p.part_number);

    for (index, part) in ordered.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(GatewayError::InvalidParts(if part.part_number < expected {
                format!("part {} listed more than once", part.part_number)
            } else {
                format!("part {} is missing", expected)
            }));
        }
        if part.part_number > MAX_PARTS {
            return Err(GatewayError::InvalidParts(format!(
                "part number {} exceeds the maximum of {}",
                part.part_number, MAX_PARTS
            )));
        }
        if part.etag.trim().is_empty() {
            return Err(GatewayError::InvalidParts(format!(
                "part {} has no content hash",
                part.part_number
            )));
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32) -> CompletedPart {
        CompletedPart {
            part_number: n,
            etag: format!("etag-{}", n),
        }
    }

    #[test]
    fn test_prepare_completion_sorts_by_part_number() {
        let ordered = prepare_completion(&[part(3), part(1), part(2)]).unwrap();
        let numbers: Vec<_> = ordered.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_prepare_completion_rejects_gap() {
        let err = prepare_completion(&[part(1), part(3)]).unwrap_err();
        assert_eq!(err, GatewayError::InvalidParts("part 2 is missing".into()));
    }

    #[test]
    fn test_prepare_completion_rejects_duplicate() {
        let err = prepare_completion(&[part(1), part(2), part(2)]).unwrap_err();
        assert_eq!(
            err,
            GatewayError::InvalidParts("part 2 listed more than once".into())
        );
    }

    #[test]
    fn test_prepare_completion_rejects_empty_and_zero() {
        assert!(prepare_completion(&[]).is_err());
        assert!(prepare_completion(&[part(0), part(1)]).is_err());
    }

    #[test]
    fn test_prepare_completion_rejects_missing_etag() {
        let parts = [CompletedPart {
            part_number: 1,
            etag: " ".into(),
        }];
        assert!(prepare_completion(&parts).is_err());
    }

    #[test]
    fn test_authorization_refresh_window() {
        let fresh = PartAuthorization {
            part_number: 1,
            url: "https://store/part".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        assert!(!fresh.needs_refresh(Duration::from_secs(30)));
        assert!(fresh.needs_refresh(Duration::from_secs(2 * 3600)));

        let stale = PartAuthorization {
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            ..fresh
        };
        assert!(stale.needs_refresh(Duration::ZERO));
    }
}
