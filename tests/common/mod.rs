//! In-memory store and transport doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use kura_uploadr::config::UploadConfig;
use kura_uploadr::namespace::{Caller, ListedObject, QualifiedKey, Role, TenantNamespace};
use kura_uploadr::s3::{
    CompletedPart, GatewayError, ObjectDescriptor, ObjectListing, ObjectStoreGateway,
    PartAuthorization,
};
use kura_uploadr::upload::{PartTransport, TransferError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MIB: usize = 1024 * 1024;
pub const NAMESPACE: &str = "org-7f3a";
pub const UPLOAD_ID: &str = "upload-0001";

pub fn writer() -> Caller {
    Caller::new(TenantNamespace::new(NAMESPACE).unwrap(), Role::Write)
}

pub fn reader() -> Caller {
    Caller::new(TenantNamespace::new(NAMESPACE).unwrap(), Role::Read)
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// Minimum part size, near-zero backoff
pub fn fast_config() -> UploadConfig {
    UploadConfig {
        retry_backoff_ms: 1,
        ..UploadConfig::default()
    }
}

/// Every call the fake store received, in arrival order
#[derive(Debug, Default)]
pub struct GatewayCalls {
    pub initiated: Vec<(String, String)>,
    pub authorized: Vec<u32>,
    pub completed: Vec<Vec<CompletedPart>>,
    pub aborted: Vec<(String, String)>,
    pub deleted: Vec<String>,
    pub folders: Vec<String>,
}

impl GatewayCalls {
    pub fn total(&self) -> usize {
        self.initiated.len()
            + self.authorized.len()
            + self.completed.len()
            + self.aborted.len()
            + self.deleted.len()
            + self.folders.len()
    }

    pub fn authorizations_for(&self, part_number: u32) -> usize {
        self.authorized.iter().filter(|&&n| n == part_number).count()
    }
}

/// Object store double
#[derive(Default)]
pub struct FakeGateway {
    pub calls: Mutex<GatewayCalls>,
    pub fail_initiate: bool,
    pub fail_complete: bool,
    pub fail_abort: bool,
    pub listing: Vec<ListedObject>,
    /// Where authorized part URLs point; `http://fake` when unset
    pub part_base_url: Option<String>,
    /// Validity of issued authorizations; one hour when unset
    pub authorization_ttl: Option<ChronoDuration>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(listing: Vec<ListedObject>) -> Self {
        Self {
            listing,
            ..Self::default()
        }
    }

    /// Authorize parts against a live endpoint such as a mock server
    pub fn with_part_base_url(base_url: impl Into<String>) -> Self {
        Self {
            part_base_url: Some(base_url.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ObjectStoreGateway for FakeGateway {
    async fn initiate_upload(
        &self,
        key: &QualifiedKey,
        content_type: &str,
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .initiated
            .push((key.to_string(), content_type.to_string()));
        if self.fail_initiate {
            return Err(GatewayError::StoreUnavailable("connection refused".into()));
        }
        Ok(UPLOAD_ID.to_string())
    }

    async fn authorize_part_upload(
        &self,
        upload_id: &str,
        key: &QualifiedKey,
        part_number: u32,
    ) -> Result<PartAuthorization, GatewayError> {
        self.calls.lock().authorized.push(part_number);
        Ok(PartAuthorization {
            part_number,
            url: format!(
                "{}/{}?partNumber={}&uploadId={}",
                self.part_base_url.as_deref().unwrap_or("http://fake"),
                key,
                part_number,
                upload_id
            ),
            expires_at: Utc::now()
                + self
                    .authorization_ttl
                    .unwrap_or_else(|| ChronoDuration::hours(1)),
        })
    }

    async fn complete_upload(
        &self,
        _upload_id: &str,
        key: &QualifiedKey,
        parts: &[CompletedPart],
    ) -> Result<ObjectDescriptor, GatewayError> {
        self.calls.lock().completed.push(parts.to_vec());
        if self.fail_complete {
            return Err(GatewayError::InvalidParts("entity too small".into()));
        }
        Ok(ObjectDescriptor {
            key: key.to_string(),
            etag: Some("final-etag-3".into()),
            location: None,
        })
    }

    async fn abort_upload(&self, upload_id: &str, key: &QualifiedKey) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .aborted
            .push((upload_id.to_string(), key.to_string()));
        if self.fail_abort {
            return Err(GatewayError::StoreUnavailable("abort timed out".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectListing for FakeGateway {
    async fn list_objects(&self, _prefix: &QualifiedKey) -> Result<Vec<ListedObject>, GatewayError> {
        Ok(self.listing.clone())
    }

    async fn delete_object(&self, key: &QualifiedKey) -> Result<(), GatewayError> {
        self.calls.lock().deleted.push(key.to_string());
        Ok(())
    }

    async fn create_folder(&self, key: &QualifiedKey) -> Result<(), GatewayError> {
        self.calls.lock().folders.push(key.to_string());
        Ok(())
    }

    async fn presign_download(&self, key: &QualifiedKey) -> Result<String, GatewayError> {
        Ok(format!("http://fake/{}?X-Amz-Expires=3600", key))
    }
}

/// Part transport double with scripted failures and delays
#[derive(Default)]
pub struct FakeTransport {
    /// Failures to return, front first, before a part succeeds
    failures: Mutex<HashMap<u32, Vec<TransferError>>>,
    delays: HashMap<u32, Duration>,
    delay_all: Option<Duration>,
    cancel_after_first: Option<CancellationToken>,
    in_flight: Mutex<InFlight>,
    /// Part numbers in the order their PUTs succeeded
    pub succeeded: Mutex<Vec<u32>>,
    pub attempts: Mutex<HashMap<u32, u32>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `part_number` with `error` the next `times` attempts
    pub fn fail(self, part_number: u32, times: usize, error: TransferError) -> Self {
        self.failures
            .lock()
            .entry(part_number)
            .or_default()
            .extend((0..times).map(|_| error.clone()));
        self
    }

    pub fn delay(mut self, part_number: u32, delay: Duration) -> Self {
        self.delays.insert(part_number, delay);
        self
    }

    /// Hold every PUT for `delay` unless a per-part delay is set
    pub fn delay_all(mut self, delay: Duration) -> Self {
        self.delay_all = Some(delay);
        self
    }

    /// Highest number of PUTs observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.in_flight.lock().max
    }

    /// Cancel `token` as soon as the first part succeeds
    pub fn cancel_after_first_part(mut self, token: CancellationToken) -> Self {
        self.cancel_after_first = Some(token);
        self
    }

    pub fn attempts_for(&self, part_number: u32) -> u32 {
        self.attempts.lock().get(&part_number).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PartTransport for FakeTransport {
    async fn put_part(
        &self,
        authorization: &PartAuthorization,
        _body: Bytes,
    ) -> Result<String, TransferError> {
        let part_number = authorization.part_number;
        *self.attempts.lock().entry(part_number).or_insert(0) += 1;
        let _in_flight = InFlightGuard::enter(&self.in_flight);

        if let Some(delay) = self.delays.get(&part_number).or(self.delay_all.as_ref()) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = {
            let mut failures = self.failures.lock();
            failures
                .get_mut(&part_number)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        self.succeeded.lock().push(part_number);
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        Ok(format!("etag-{}", part_number))
    }
}

#[derive(Debug, Default)]
struct InFlight {
    current: usize,
    max: usize,
}

/// Counts one running PUT; released on return or when the future is dropped
struct InFlightGuard<'a>(&'a Mutex<InFlight>);

impl<'a> InFlightGuard<'a> {
    fn enter(gauge: &'a Mutex<InFlight>) -> Self {
        let mut state = gauge.lock();
        state.current += 1;
        state.max = state.max.max(state.current);
        drop(state);
        Self(gauge)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().current -= 1;
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
