//! Separation job state
//!
//! A job moves from `Pending` to exactly one terminal status. Its outcome is
//! handed to the waiting request through a [`CompletionLatch`], a
//! single-assignment channel: whichever completion source fires first wins,
//! and every later attempt is ignored.

use chrono::{DateTime, Utc};
use looplytic_common::{time, uuid_utils, AudioFeatureRecord, StemSet};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::UploadedAudio;

/// Lifecycle status of a separation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// One end-to-end separation request
#[derive(Debug)]
pub struct SeparationJob {
    /// Random per-job identifier; also names the output directory
    pub session_id: Uuid,
    pub upload: UploadedAudio,
    /// `<separated_root>/<session_id>`, never shared between jobs
    pub output_dir: PathBuf,
    /// Combined stdout/stderr of the separation process
    pub diagnostics: String,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    started: Instant,
    status: JobStatus,
}

impl SeparationJob {
    pub fn new(upload: UploadedAudio, separated_root: &Path) -> Self {
        let session_id = uuid_utils::generate();
        Self {
            session_id,
            upload,
            output_dir: separated_root.join(session_id.to_string()),
            diagnostics: String::new(),
            exit_code: None,
            created_at: time::now(),
            started: Instant::now(),
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to a terminal status
    ///
    /// Returns false (and leaves the status untouched) if the job already
    /// finished or `status` is not terminal.
    pub fn finish(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            warn!(
                session_id = %self.session_id,
                current = ?self.status,
                requested = ?status,
                "Ignoring job status transition"
            );
            return false;
        }
        self.status = status;
        true
    }
}

/// Successful job result
#[derive(Debug, Clone)]
pub struct JobSuccess {
    pub session_id: Uuid,
    pub stems: StemSet,
    pub analysis: AudioFeatureRecord,
    pub original_file: String,
    pub processing_time: Duration,
}

/// Failed job result, carrying any analysis computed before the failure
#[derive(Debug)]
pub struct JobFailure {
    pub session_id: Uuid,
    pub error: JobError,
    pub analysis: Option<AudioFeatureRecord>,
}

impl JobFailure {
    pub fn new(session_id: Uuid, error: JobError, analysis: Option<AudioFeatureRecord>) -> Self {
        Self {
            session_id,
            error,
            analysis,
        }
    }
}

pub type JobOutcome = Result<JobSuccess, JobFailure>;

/// Single-assignment delivery of a value to one waiting receiver
#[derive(Debug)]
pub struct CompletionLatch<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionLatch<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver `value` if nothing was delivered yet
    ///
    /// Returns true only for the call that claimed the latch. A claimed
    /// latch whose receiver is gone still counts as completed.
    pub fn complete(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match sender {
            Some(tx) => {
                if tx.send(value).is_err() {
                    debug!("Completion receiver dropped before delivery");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

/// Completion side of a job
///
/// Produces the job's single response. If dropped before responding (the job
/// task panicked or returned early) it responds with an internal failure, so
/// the waiting request never hangs.
#[derive(Debug)]
pub struct JobResponder {
    session_id: Uuid,
    latch: CompletionLatch<JobOutcome>,
}

impl JobResponder {
    pub fn new(session_id: Uuid) -> (Self, oneshot::Receiver<JobOutcome>) {
        let (latch, rx) = CompletionLatch::new();
        (Self { session_id, latch }, rx)
    }

    /// Returns false if a response was already produced
    pub fn respond(&self, outcome: JobOutcome) -> bool {
        let delivered = self.latch.complete(outcome);
        if !delivered {
            warn!(session_id = %self.session_id, "Duplicate job response suppressed");
        }
        delivered
    }

    pub fn has_responded(&self) -> bool {
        self.latch.is_completed()
    }
}

impl Drop for JobResponder {
    fn drop(&mut self) {
        if self.latch.is_completed() {
            return;
        }
        warn!(session_id = %self.session_id, "Job ended without a response");
        self.latch.complete(Err(JobFailure::new(
            self.session_id,
            JobError::Internal("Job ended without producing a result".to_string()),
            None,
        )));
    }
}
