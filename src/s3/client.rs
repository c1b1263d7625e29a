//! AWS SDK implementation of the gateway and listing traits

use super::{
    prepare_completion, CompletedPart, CredentialsProvider, GatewayError, ObjectDescriptor,
    ObjectListing, ObjectStoreGateway, PartAuthorization,
};
use crate::config::{StoreConfig, UploadConfig};
use crate::metrics;
use crate::namespace::{ListedObject, QualifiedKey};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Validity of presigned download links
const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(3600);

/// Gateway backed by the AWS SDK
///
/// Constructed once and injected wherever store access is needed; nothing in
/// the crate reads store settings from the environment at call sites.
#[derive(Clone)]
pub struct S3Gateway {
    client: Client,
    bucket: String,
    authorization_ttl: Duration,
}

impl S3Gateway {
    /// Build a gateway from the store and upload configuration.
    ///
    /// Static keys from the configuration win; otherwise credentials come
    /// from the AWS default provider chain.
    pub async fn connect(store: &StoreConfig, upload: &UploadConfig) -> Result<Self, GatewayError> {
        let region = Region::new(store.region.clone());

        let mut builder = match CredentialsProvider::from_config(store)? {
            Some(credentials) => S3ConfigBuilder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                S3ConfigBuilder::from(&shared)
            }
        };

        if let Some(endpoint) = &store.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(store.force_path_style);

        tracing::info!(
            bucket = %store.bucket,
            region = %store.region,
            endpoint = ?store.endpoint,
            "Object store gateway configured"
        );

        Ok(Self::from_client(
            Client::from_conf(builder.build()),
            &store.bucket,
            upload.authorization_ttl(),
        ))
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: Client, bucket: &str, authorization_ttl: Duration) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            authorization_ttl,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn presigning(ttl: Duration) -> Result<PresigningConfig, GatewayError> {
        PresigningConfig::expires_in(ttl).map_err(|e| GatewayError::Presign(e.to_string()))
    }
}

fn store_error<E: std::error::Error>(operation: &'static str, error: E) -> GatewayError {
    metrics::record_store_operation(operation, false);
    GatewayError::StoreUnavailable(format!("{}: {}", operation, DisplayErrorContext(error)))
}

fn expiry_after(issued_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => issued_at + ttl,
        Err(_) => issued_at,
    }
}

fn to_chrono(timestamp: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[async_trait]
impl ObjectStoreGateway for S3Gateway {
    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self, key),
        fields(
            s3.bucket = %self.bucket,
            s3.key = %key,
            upload_id = tracing::field::Empty
        ),
        err
    )]
    async fn initiate_upload(
        &self,
        key: &QualifiedKey,
        content_type: &str,
    ) -> Result<String, GatewayError> {
        if key.is_folder() {
            return Err(GatewayError::InvalidKey(format!(
                "'{}' names a folder, not an object",
                key
            )));
        }

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| store_error("create_multipart_upload", e))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| {
                GatewayError::StoreUnavailable("store returned no upload id".into())
            })?
            .to_string();

        tracing::Span::current().record("upload_id", upload_id.as_str());
        metrics::record_store_operation("create_multipart_upload", true);
        tracing::debug!(upload_id = %upload_id, "Multipart upload created");

        Ok(upload_id)
    }

    #[tracing::instrument(
        name = "s3.presign_upload_part",
        skip(self, key),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn authorize_part_upload(
        &self,
        upload_id: &str,
        key: &QualifiedKey,
        part_number: u32,
    ) -> Result<PartAuthorization, GatewayError> {
        if part_number == 0 || part_number > super::MAX_PARTS {
            return Err(GatewayError::InvalidParts(format!(
                "part number {} outside 1..={}",
                part_number,
                super::MAX_PARTS
            )));
        }

        // Taken before signing so the recorded expiry never overshoots the real one.
        let issued_at = Utc::now();
        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .presigned(Self::presigning(self.authorization_ttl)?)
            .await
            .map_err(|e| GatewayError::Presign(DisplayErrorContext(e).to_string()))?;

        Ok(PartAuthorization {
            part_number,
            url: request.uri().to_string(),
            expires_at: expiry_after(issued_at, self.authorization_ttl),
        })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, key, parts),
        fields(
            s3.bucket = %self.bucket,
            s3.key = %key,
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn complete_upload(
        &self,
        upload_id: &str,
        key: &QualifiedKey,
        parts: &[CompletedPart],
    ) -> Result<ObjectDescriptor, GatewayError> {
        let ordered = prepare_completion(parts)?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                ordered
                    .iter()
                    .map(|part| {
                        S3CompletedPart::builder()
                            .part_number(part.part_number as i32)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| store_error("complete_multipart_upload", e))?;

        if let Some(etag) = output.e_tag() {
            tracing::Span::current().record("s3.etag", etag);
        }
        metrics::record_store_operation("complete_multipart_upload", true);

        Ok(ObjectDescriptor {
            key: key.as_str().to_string(),
            etag: output.e_tag().map(str::to_string),
            location: output.location().map(str::to_string),
        })
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self, key),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn abort_upload(&self, upload_id: &str, key: &QualifiedKey) -> Result<(), GatewayError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| store_error("abort_multipart_upload", e))?;

        metrics::record_store_operation("abort_multipart_upload", true);
        Ok(())
    }
}

#[async_trait]
impl ObjectListing for S3Gateway {
    #[tracing::instrument(
        name = "s3.list_objects",
        skip(self, prefix),
        fields(s3.bucket = %self.bucket, s3.prefix = %prefix, count = tracing::field::Empty),
        err
    )]
    async fn list_objects(&self, prefix: &QualifiedKey) -> Result<Vec<ListedObject>, GatewayError> {
        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix.as_str())
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| store_error("list_objects_v2", e))?;

            for common in output.common_prefixes() {
                if let Some(folder) = common.prefix() {
                    folders.push(ListedObject::folder(folder));
                }
            }

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                // The folder's own placeholder object is not a child of itself.
                if key == prefix.as_str() {
                    continue;
                }
                files.push(ListedObject::file(
                    key,
                    object.size().unwrap_or(0).max(0) as u64,
                    object.last_modified().and_then(to_chrono),
                ));
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        folders.append(&mut files);
        tracing::Span::current().record("count", folders.len());
        metrics::record_store_operation("list_objects_v2", true);
        Ok(folders)
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip(self, key),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn delete_object(&self, key: &QualifiedKey) -> Result<(), GatewayError> {
        if key.relative().is_empty() {
            return Err(GatewayError::InvalidKey(
                "the namespace root cannot be deleted".into(),
            ));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| store_error("delete_object", e))?;

        metrics::record_store_operation("delete_object", true);
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.create_folder",
        skip(self, key),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn create_folder(&self, key: &QualifiedKey) -> Result<(), GatewayError> {
        if !key.is_folder() || key.relative().is_empty() {
            return Err(GatewayError::InvalidKey(format!(
                "'{}' is not a folder key",
                key
            )));
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|e| store_error("put_object", e))?;

        metrics::record_store_operation("put_object", true);
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.presign_get_object",
        skip(self, key),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn presign_download(&self, key: &QualifiedKey) -> Result<String, GatewayError> {
        if key.is_folder() {
            return Err(GatewayError::InvalidKey(format!(
                "'{}' names a folder, not an object",
                key
            )));
        }

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .presigned(Self::presigning(DOWNLOAD_URL_TTL)?)
            .await
            .map_err(|e| GatewayError::Presign(DisplayErrorContext(e).to_string()))?;

        Ok(request.uri().to_string())
    }
}
