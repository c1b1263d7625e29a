//! Multipart upload orchestrator
//!
//! Runs one upload end to end: role and namespace checks, initiate, part
//! scheduling, then exactly one of complete or abort.

use super::progress::{ProgressEstimator, ProgressReporter, ProgressUpdate};
use super::scheduler::{PartScheduler, SchedulerOutcome, SchedulerSettings};
use super::session::{SessionStatus, UploadSession};
use super::source::ByteSource;
use super::transfer::PartTransport;
use super::{PartPlan, UploadError};
use crate::config::{ConfigError, UploadConfig};
use crate::metrics;
use crate::namespace::Caller;
use crate::s3::{ObjectDescriptor, ObjectStoreGateway};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// One object to upload
pub struct UploadRequest {
    /// Destination, relative to the caller's namespace
    pub path: String,
    pub content_type: String,
    pub source: Arc<dyn ByteSource>,
}

/// Non-error endings of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed(ObjectDescriptor),
    /// Cancelled by the caller; any reserved storage was released
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub outcome: UploadOutcome,
    /// Destination relative to the caller's namespace
    pub path: String,
    pub upload_id: Option<String>,
    pub total_parts: u32,
    pub total_bytes: u64,
    pub status: SessionStatus,
}

/// Drives large-object uploads against an injected gateway and transport
pub struct MultipartUploader {
    gateway: Arc<dyn ObjectStoreGateway>,
    scheduler: PartScheduler,
    config: UploadConfig,
}

impl MultipartUploader {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = PartScheduler::new(
            gateway.clone(),
            transport,
            SchedulerSettings::from(&config),
        );

        Ok(Self {
            gateway,
            scheduler,
            config,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `request.source` to `request.path` under the caller's namespace.
    ///
    /// Cancellation through `cancel` is reported as
    /// [`UploadOutcome::Cancelled`], not as an error. Every path that does not
    /// reach `Completed` aborts the store-side upload; if that abort fails the
    /// result is [`UploadError::SessionAbortFailure`], whatever caused it.
    #[tracing::instrument(
        name = "upload.multipart",
        skip_all,
        fields(
            namespace = %caller.namespace(),
            path = %request.path,
            upload_id = tracing::field::Empty
        )
    )]
    pub async fn upload(
        &self,
        caller: &Caller,
        request: UploadRequest,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<ProgressUpdate>>,
    ) -> Result<UploadReport, UploadError> {
        caller.require_write()?;
        let key = caller.namespace().qualify(&request.path)?;
        if key.is_folder() {
            return Err(UploadError::InvalidNamespace(format!(
                "'{}' names a folder, not an object",
                request.path
            )));
        }

        let plan = PartPlan::new(request.source.len(), self.config.part_size)?;
        let session = Arc::new(UploadSession::new(key, plan));

        if cancel.is_cancelled() {
            session.begin_abort();
            metrics::record_upload_outcome("cancelled");
            return Ok(self.report(&session, &request.path, UploadOutcome::Cancelled));
        }

        let upload_id = self
            .gateway
            .initiate_upload(session.key(), &request.content_type)
            .await?;
        session.start(upload_id.clone())?;
        tracing::Span::current().record("upload_id", upload_id.as_str());
        metrics::record_parts_per_upload(plan.total_parts());
        tracing::info!(
            upload_id = %upload_id,
            total_parts = plan.total_parts(),
            total_bytes = plan.total_size(),
            "Multipart upload started"
        );

        let reporter = Arc::new(ProgressReporter::new(
            ProgressEstimator::new(plan.total_size(), plan.total_parts()),
            progress,
        ));

        let outcome = self
            .scheduler
            .run(session.clone(), request.source.clone(), reporter, &cancel)
            .await;

        let result = match outcome {
            SchedulerOutcome::AllPartsDone if !cancel.is_cancelled() => {
                self.complete(&session, &request.path).await
            }
            SchedulerOutcome::AllPartsDone | SchedulerOutcome::Cancelled => {
                tracing::info!(upload_id = %upload_id, "Upload cancelled, releasing parts");
                self.abort(&session)
                    .await
                    .map(|()| self.report(&session, &request.path, UploadOutcome::Cancelled))
            }
            SchedulerOutcome::Failed(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Upload failed, releasing parts");
                self.abort(&session).await.and(Err(e))
            }
        };

        // An abort failure replaces the result and still counts as failed
        metrics::record_upload_outcome(match &result {
            Ok(report) if report.outcome == UploadOutcome::Cancelled => "cancelled",
            Ok(_) => "completed",
            Err(_) => "failed",
        });
        result
    }

    async fn complete(
        &self,
        session: &UploadSession,
        path: &str,
    ) -> Result<UploadReport, UploadError> {
        let Some(upload_id) = session.upload_id() else {
            return Err(UploadError::InvalidTransition {
                from: session.status(),
                to: SessionStatus::Completed,
            });
        };

        let parts = session.ordered_parts();
        match self
            .gateway
            .complete_upload(&upload_id, session.key(), &parts)
            .await
        {
            Ok(object) => {
                session.complete()?;
                tracing::info!(
                    upload_id = %upload_id,
                    etag = ?object.etag,
                    "Multipart upload completed"
                );
                Ok(self.report(session, path, UploadOutcome::Completed(object)))
            }
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Completion failed, releasing parts");
                self.abort(session).await.and(Err(e.into()))
            }
        }
    }

    /// Release the store-side upload, at most once per session.
    ///
    /// Not tied to the caller's cancellation token: cleanup must run to
    /// completion even when the caller has given up.
    async fn abort(&self, session: &UploadSession) -> Result<(), UploadError> {
        let Some(upload_id) = session.begin_abort() else {
            return Ok(());
        };

        match self.gateway.abort_upload(&upload_id, session.key()).await {
            Ok(()) => {
                session.aborted()?;
                metrics::record_abort(true);
                tracing::info!(upload_id = %upload_id, key = %session.key(), "Multipart upload aborted");
                Ok(())
            }
            Err(e) => {
                session.abort_failed()?;
                metrics::record_abort(false);
                tracing::error!(
                    upload_id = %upload_id,
                    key = %session.key(),
                    error = %e,
                    "Multipart upload abort failed, incomplete parts may remain in the store"
                );
                Err(UploadError::SessionAbortFailure {
                    upload_id,
                    key: session.key().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn report(&self, session: &UploadSession, path: &str, outcome: UploadOutcome) -> UploadReport {
        UploadReport {
            outcome,
            path: path.to_string(),
            upload_id: session.upload_id(),
            total_parts: session.plan().total_parts(),
            total_bytes: session.plan().total_size(),
            status: session.status(),
        }
    }
}
