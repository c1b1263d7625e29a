//! Part scheduler
//!
//! Drives a fixed-width pool of workers over a shared queue of part tasks.
//! Parts complete in whatever order the network allows; only the final
//! completion call imposes ordering.

use super::progress::ProgressReporter;
use super::session::UploadSession;
use super::source::ByteSource;
use super::transfer::{PartTransport, TransferError};
use super::{PartTask, UploadError};
use crate::config::UploadConfig;
use crate::metrics;
use crate::s3::{CompletedPart, GatewayError, ObjectStoreGateway, PartAuthorization};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Ceiling for the exponential retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Worker pool tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub refresh_margin: Duration,
}

impl From<&UploadConfig> for SchedulerSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            concurrency: config.concurrent_parts,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            refresh_margin: config.authorization_refresh_margin(),
        }
    }
}

impl SchedulerSettings {
    /// Attempts each part gets before the session gives up on it
    pub fn attempts_per_part(&self) -> u32 {
        1 + self.max_retries
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// How a scheduler run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Every part is recorded on the session
    AllPartsDone,
    /// The caller cancelled; dispatched work has drained
    Cancelled,
    /// A part failed fatally; the other workers were stopped
    Failed(UploadError),
}

/// Bounded per-session worker pool
#[derive(Clone)]
pub struct PartScheduler {
    gateway: Arc<dyn ObjectStoreGateway>,
    transport: Arc<dyn PartTransport>,
    settings: SchedulerSettings,
}

struct WorkerContext {
    scheduler: PartScheduler,
    session: Arc<UploadSession>,
    source: Arc<dyn ByteSource>,
    queue: Arc<Mutex<VecDeque<PartTask>>>,
    progress: Arc<ProgressReporter>,
    upload_id: String,
    cancel: CancellationToken,
}

impl PartScheduler {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        transport: Arc<dyn PartTransport>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            gateway,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Upload every planned part of a started session.
    ///
    /// Returns once all workers have finished. A fatal part error cancels the
    /// remaining workers through a child of `cancel`, leaving the caller's
    /// token untouched.
    pub async fn run(
        &self,
        session: Arc<UploadSession>,
        source: Arc<dyn ByteSource>,
        progress: Arc<ProgressReporter>,
        cancel: &CancellationToken,
    ) -> SchedulerOutcome {
        let Some(upload_id) = session.upload_id() else {
            return SchedulerOutcome::Failed(UploadError::InvalidTransition {
                from: session.status(),
                to: super::SessionStatus::InProgress,
            });
        };

        let queue: VecDeque<PartTask> = session.plan().tasks().collect();
        let width = self.settings.concurrency.clamp(1, queue.len().max(1));
        let queue = Arc::new(Mutex::new(queue));
        let workers_cancel = cancel.child_token();

        tracing::debug!(
            upload_id = %upload_id,
            total_parts = session.plan().total_parts(),
            workers = width,
            "Starting part workers"
        );

        let mut workers = JoinSet::new();
        for _ in 0..width {
            let ctx = WorkerContext {
                scheduler: self.clone(),
                session: session.clone(),
                source: source.clone(),
                queue: queue.clone(),
                progress: progress.clone(),
                upload_id: upload_id.clone(),
                cancel: workers_cancel.clone(),
            };
            workers.spawn(ctx.run());
        }

        let mut fatal: Option<UploadError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(UploadError::WorkerFailed(e.to_string())));
            if let Err(e) = result {
                if fatal.is_none() {
                    tracing::warn!(upload_id = %upload_id, error = %e, "Stopping part workers");
                    workers_cancel.cancel();
                    fatal = Some(e);
                }
            }
        }

        if let Some(e) = fatal {
            SchedulerOutcome::Failed(e)
        } else if cancel.is_cancelled() {
            SchedulerOutcome::Cancelled
        } else if session.parts_completed() == session.plan().total_parts() {
            SchedulerOutcome::AllPartsDone
        } else {
            SchedulerOutcome::Failed(UploadError::InvalidTransition {
                from: session.status(),
                to: super::SessionStatus::Completing,
            })
        }
    }
}

impl WorkerContext {
    async fn run(self) -> Result<(), UploadError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let next = self.queue.lock().pop_front();
            let Some(task) = next else {
                return Ok(());
            };

            match self.upload_part(&task).await? {
                Some(part) => {
                    let record = self.session.record_part(part, task.len())?;
                    metrics::record_bytes_uploaded(task.len());
                    self.progress.report(record.bytes_acked, record.parts_completed);
                }
                None => return Ok(()),
            }
        }
    }

    /// Upload one part within its retry budget. `Ok(None)` means cancelled.
    async fn upload_part(&self, task: &PartTask) -> Result<Option<CompletedPart>, UploadError> {
        let body = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            read = self.source.read_range(task.range.clone()) => read.map_err(|e| {
                UploadError::Source(format!("part {}: {}", task.part_number, e))
            })?,
        };

        let settings = self.scheduler.settings;
        let attempts = settings.attempts_per_part();
        let mut authorization: Option<PartAuthorization> = None;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                result = self.attempt(task.part_number, &mut authorization, body.clone()) => result,
            };

            match result {
                Ok(etag) => {
                    metrics::record_part_attempt("success");
                    tracing::debug!(
                        upload_id = %self.upload_id,
                        part_number = task.part_number,
                        attempt,
                        "Part uploaded"
                    );
                    return Ok(Some(CompletedPart {
                        part_number: task.part_number,
                        etag,
                    }));
                }
                Err(e) if e.is_transient() => {
                    metrics::record_part_attempt("retry");
                    tracing::warn!(
                        upload_id = %self.upload_id,
                        part_number = task.part_number,
                        attempt,
                        attempts,
                        error = %e,
                        "Part attempt failed"
                    );
                    last_error = Some(e);

                    if attempt < attempts {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Ok(None),
                            _ = tokio::time::sleep(settings.backoff(attempt)) => {}
                        }
                    }
                }
                Err(e) => {
                    metrics::record_part_attempt("rejected");
                    return Err(e);
                }
            }
        }

        Err(UploadError::RetriesExhausted {
            part_number: task.part_number,
            attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// One authorize-then-transfer attempt
    ///
    /// The authorization is cached across attempts and replaced when it is
    /// about to expire or the store refused it.
    async fn attempt(
        &self,
        part_number: u32,
        cached: &mut Option<PartAuthorization>,
        body: bytes::Bytes,
    ) -> Result<String, UploadError> {
        let settings = &self.scheduler.settings;
        let authorization = match cached.take() {
            Some(auth) if !auth.needs_refresh(settings.refresh_margin) => auth,
            _ => self
                .scheduler
                .gateway
                .authorize_part_upload(&self.upload_id, self.session.key(), part_number)
                .await
                .map_err(authorization_error)?,
        };

        let started = Instant::now();
        let result = self.scheduler.transport.put_part(&authorization, body).await;
        metrics::record_part_duration(started.elapsed());

        match result {
            Ok(etag) => Ok(etag),
            Err(e) => {
                if !e.requires_fresh_authorization() {
                    *cached = Some(authorization);
                }
                Err(classify(part_number, e))
            }
        }
    }
}

fn authorization_error(e: GatewayError) -> UploadError {
    match e {
        GatewayError::StoreUnavailable(msg) | GatewayError::Presign(msg) => {
            UploadError::TransientTransport(format!("authorization: {}", msg))
        }
        other => other.into(),
    }
}

fn classify(part_number: u32, e: TransferError) -> UploadError {
    match e {
        TransferError::Integrity(reason) => UploadError::IntegrityMismatch {
            part_number,
            reason,
        },
        e if e.is_transient() => {
            UploadError::TransientTransport(format!("part {}: {}", part_number, e))
        }
        e => UploadError::PartRejected {
            part_number,
            reason: e.to_string(),
        },
    }
}
