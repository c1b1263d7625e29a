//! Upload module
//!
//! Large-object multipart uploads: a byte source is split into fixed-size
//! parts, the parts are pushed straight to the store through presigned
//! authorizations by a bounded worker pool, and the session either completes
//! with every part in ascending order or aborts so no storage is left behind.

use crate::namespace::{NamespaceError, Role};
use crate::s3::GatewayError;
use thiserror::Error;

pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod transfer;

pub use orchestrator::{MultipartUploader, UploadOutcome, UploadReport, UploadRequest};
pub use plan::{PartPlan, PartTask};
pub use progress::{ProgressEstimator, ProgressReporter, ProgressUpdate};
pub use scheduler::{PartScheduler, SchedulerOutcome, SchedulerSettings};
pub use session::{SessionStatus, UploadSession};
pub use source::{ByteSource, FileSource};
pub use transfer::{HttpPartTransport, PartTransport, TransferError};

/// Upload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Role '{0}' may not upload objects")]
    AuthorizationDenied(Role),

    #[error("Invalid namespace or path: {0}")]
    InvalidNamespace(String),

    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transient transport error: {0}")]
    TransientTransport(String),

    #[error("Part {part_number} integrity mismatch: {reason}")]
    IntegrityMismatch { part_number: u32, reason: String },

    #[error("Part {part_number} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        part_number: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("Part {part_number} rejected by the store: {reason}")]
    PartRejected { part_number: u32, reason: String },

    #[error("Failed to read source: {0}")]
    Source(String),

    #[error("Source is empty")]
    EmptySource,

    #[error("Invalid part size: {0}")]
    InvalidPartSize(u64),

    #[error("Upload needs {required} parts, more than the store limit of {max}")]
    TooManyParts { required: u64, max: u32 },

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Part worker failed: {0}")]
    WorkerFailed(String),

    #[error("Abort of upload {upload_id} for '{key}' failed, storage may be orphaned: {reason}")]
    SessionAbortFailure {
        upload_id: String,
        key: String,
        reason: String,
    },
}

impl UploadError {
    /// Whether a part attempt failing with this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UploadError::TransientTransport(_) | UploadError::IntegrityMismatch { .. }
        )
    }
}

impl From<NamespaceError> for UploadError {
    fn from(e: NamespaceError) -> Self {
        match e {
            NamespaceError::AuthorizationDenied(role) => UploadError::AuthorizationDenied(role),
            other => UploadError::InvalidNamespace(other.to_string()),
        }
    }
}

impl From<GatewayError> for UploadError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidKey(msg) => UploadError::InvalidNamespace(msg),
            other => UploadError::StoreUnavailable(other.to_string()),
        }
    }
}
