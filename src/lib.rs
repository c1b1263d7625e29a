//! Kura Uploadr Library
//!
//! Tenant-scoped large-object uploads for S3-compatible buckets.
//!
//! # Features
//!
//! - **Multipart Uploads**: fixed-size parts pushed through presigned URLs by a
//!   bounded per-upload worker pool, completed in part order
//! - **No Orphaned Parts**: every failed or cancelled upload is aborted, and an
//!   abort that fails is surfaced as an error
//! - **Tenant Isolation**: every key is rooted under the caller's organization
//!   namespace and listings are relativized before they leave the crate
//! - **Role Gating**: `read` callers may browse but never write
//!
//! # Example
//!
//! ```no_run
//! use kura_uploadr::config::Config;
//! use kura_uploadr::namespace::{Caller, Role, TenantNamespace};
//! use kura_uploadr::s3::S3Gateway;
//! use kura_uploadr::upload::{FileSource, HttpPartTransport, MultipartUploader, UploadRequest};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let gateway = Arc::new(S3Gateway::connect(&config.store, &config.upload).await?);
//!     let transport = Arc::new(HttpPartTransport::new(Duration::from_secs(10))?);
//!     let uploader = MultipartUploader::new(gateway, transport, config.upload.clone())?;
//!
//!     let caller = Caller::new(TenantNamespace::new("0b6f9c1e")?, Role::Write);
//!     let request = UploadRequest {
//!         path: "videos/keynote.mp4".into(),
//!         content_type: "video/mp4".into(),
//!         source: Arc::new(FileSource::open("keynote.mp4").await?),
//!     };
//!     let report = uploader
//!         .upload(&caller, request, CancellationToken::new(), None)
//!         .await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod namespace;
pub mod router;
pub mod s3;
pub mod server;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::ApiServer;
pub use upload::MultipartUploader;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
