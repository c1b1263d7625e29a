//! Upload session state machine
//!
//! ```text
//! Pending -> InProgress -> Completing -> Completed
//!     \          |             |
//!      \         v             v
//!       `----> Aborting -> Aborted | Failed
//! ```
//!
//! All mutation goes through one mutex. The lock is never held across an
//! await, so workers only contend for the few instructions it takes to record
//! a part.

use super::{PartPlan, UploadError};
use crate::namespace::QualifiedKey;
use crate::s3::CompletedPart;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of one multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completing,
    Completed,
    Aborting,
    Aborted,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completing => "completing",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborting => "aborting",
            SessionStatus::Aborted => "aborted",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of recording one acknowledged part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRecord {
    pub parts_completed: u32,
    pub bytes_acked: u64,
    /// True for exactly one report: the one that completed the part set
    pub all_parts_done: bool,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    upload_id: Option<String>,
    parts: BTreeMap<u32, CompletedPart>,
    bytes_acked: u64,
}

/// One multipart upload: target key, part plan, part inventory and status
#[derive(Debug)]
pub struct UploadSession {
    key: QualifiedKey,
    plan: PartPlan,
    state: Mutex<SessionState>,
}

impl UploadSession {
    pub fn new(key: QualifiedKey, plan: PartPlan) -> Self {
        Self {
            key,
            plan,
            state: Mutex::new(SessionState {
                status: SessionStatus::Pending,
                upload_id: None,
                parts: BTreeMap::new(),
                bytes_acked: 0,
            }),
        }
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    pub fn plan(&self) -> &PartPlan {
        &self.plan
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn upload_id(&self) -> Option<String> {
        self.state.lock().upload_id.clone()
    }

    pub fn parts_completed(&self) -> u32 {
        self.state.lock().parts.len() as u32
    }

    pub fn bytes_acked(&self) -> u64 {
        self.state.lock().bytes_acked
    }

    /// `Pending -> InProgress` once the store has issued an upload id
    pub fn start(&self, upload_id: impl Into<String>) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        transition(&mut state, &[SessionStatus::Pending], SessionStatus::InProgress)?;
        state.upload_id = Some(upload_id.into());
        Ok(())
    }

    /// Record an acknowledged part.
    ///
    /// The report that completes the part set moves the session to
    /// `Completing`. A repeated report for a part already recorded keeps the
    /// first content hash and does not count its bytes twice.
    pub fn record_part(&self, part: CompletedPart, bytes: u64) -> Result<PartRecord, UploadError> {
        let mut state = self.state.lock();

        if state.status != SessionStatus::InProgress {
            return Err(UploadError::InvalidTransition {
                from: state.status,
                to: SessionStatus::InProgress,
            });
        }

        if self.plan.part(part.part_number).is_none() {
            return Err(UploadError::PartRejected {
                part_number: part.part_number,
                reason: format!("outside the plan of {} parts", self.plan.total_parts()),
            });
        }

        if !state.parts.contains_key(&part.part_number) {
            state.parts.insert(part.part_number, part);
            state.bytes_acked += bytes;
        }

        let parts_completed = state.parts.len() as u32;
        let all_parts_done = parts_completed == self.plan.total_parts();
        if all_parts_done {
            state.status = SessionStatus::Completing;
        }

        Ok(PartRecord {
            parts_completed,
            bytes_acked: state.bytes_acked,
            all_parts_done,
        })
    }

    /// Recorded parts, ascending by part number
    pub fn ordered_parts(&self) -> Vec<CompletedPart> {
        self.state.lock().parts.values().cloned().collect()
    }

    /// `Completing -> Completed`
    pub fn complete(&self) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        transition(&mut state, &[SessionStatus::Completing], SessionStatus::Completed)
    }

    /// Move to `Aborting` and hand out the upload id to release.
    ///
    /// Returns `Some` at most once per session. A session the store never
    /// issued an id for has nothing to release and goes straight to `Aborted`.
    pub fn begin_abort(&self) -> Option<String> {
        let mut state = self.state.lock();
        if state.status.is_terminal() || state.status == SessionStatus::Aborting {
            return None;
        }

        match state.upload_id.clone() {
            Some(upload_id) => {
                state.status = SessionStatus::Aborting;
                Some(upload_id)
            }
            None => {
                state.status = SessionStatus::Aborted;
                None
            }
        }
    }

    /// `Aborting -> Aborted`
    pub fn aborted(&self) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        transition(&mut state, &[SessionStatus::Aborting], SessionStatus::Aborted)
    }

    /// `Aborting -> Failed`: the store may still hold the upload's parts
    pub fn abort_failed(&self) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        transition(&mut state, &[SessionStatus::Aborting], SessionStatus::Failed)
    }
}

fn transition(
    state: &mut SessionState,
    allowed_from: &[SessionStatus],
    to: SessionStatus,
) -> Result<(), UploadError> {
    if !allowed_from.contains(&state.status) {
        return Err(UploadError::InvalidTransition {
            from: state.status,
            to,
        });
    }
    state.status = to;
    Ok(())
}
