//! Error types for looplytic-server
//!
//! Every failure path produces a JSON body with `success: false` and an
//! `error` message. `kind` distinguishes the error families so clients can
//! tell a spawn failure from a failed run.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use looplytic_common::StemName;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::services::ChordError;

/// Fallback detail when a failed tool printed nothing
const NO_DIAGNOSTICS: &str = "Unknown error occurred during processing";

/// API error type for request-level failures
#[derive(Debug, Error)]
pub enum ApiError {
    /// Upload rejected or failed to store
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Chord analysis tool failed
    #[error(transparent)]
    Analysis(#[from] ChordError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::Upload(err) => (err.status(), err.kind()),
            ApiError::Analysis(err) => match err {
                ChordError::TimedOut => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                ChordError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
                ChordError::Spawn(_) => (StatusCode::INTERNAL_SERVER_ERROR, "spawn_failure"),
                ChordError::Failed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "process_failure"),
                ChordError::Parse(_) => (StatusCode::INTERNAL_SERVER_ERROR, "malformed_output"),
                ChordError::Reported(_) => (StatusCode::INTERNAL_SERVER_ERROR, "analysis_error"),
            },
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Upload rejected before any external process is started
#[derive(Debug, Error)]
pub enum UploadError {
    /// Request carried no file in the expected field
    #[error("No audio file uploaded")]
    MissingFile,

    /// Extension not on the allow-list
    #[error("Invalid file type. Please upload {allowed} files.")]
    InvalidType { allowed: String },

    /// Upload exceeded the configured maximum
    #[error("File too large. Maximum size is {limit_mb} MB")]
    TooLarge { limit_mb: u64 },

    /// Multipart body could not be read
    #[error("Malformed upload: {0}")]
    Malformed(String),

    /// Storing the file failed
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::MissingFile | UploadError::InvalidType { .. } | UploadError::Malformed(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::MissingFile | UploadError::InvalidType { .. } | UploadError::Malformed(_) => {
                "validation"
            }
            UploadError::TooLarge { .. } => "payload_too_large",
            UploadError::Io(_) => "internal",
        }
    }
}

/// Fatal failure of a separation job
#[derive(Debug, Error)]
pub enum JobError {
    /// Separation tool or its runtime is not usable
    #[error("{reason}")]
    Capability {
        reason: String,
        details: Option<String>,
    },

    /// Separation process could not be started (no exit code)
    #[error("Failed to start separation process")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Separation process ran and exited unsuccessfully
    #[error("Audio separation failed")]
    Process {
        exit_code: Option<i32>,
        stderr: String,
        stdout: String,
    },

    /// Separation exceeded its deadline and was killed
    #[error("Audio separation timed out")]
    Timeout { after: Duration },

    /// Separation was interrupted by server shutdown
    #[error("Separation cancelled: server shutting down")]
    Cancelled,

    /// Tool exited successfully but not every stem was written
    #[error("Missing stems: {}", join_stems(.missing))]
    MissingStems {
        missing: Vec<StemName>,
        expected_dir: PathBuf,
        generated: Vec<StemName>,
    },

    /// Filesystem failure while preparing the job
    #[error("Internal server error")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("Internal server error")]
    Internal(String),
}

fn join_stems(stems: &[StemName]) -> String {
    stems.iter().map(StemName::as_str).collect::<Vec<_>>().join(", ")
}

impl JobError {
    pub fn status(&self) -> StatusCode {
        match self {
            JobError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            JobError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Capability { .. } => "capability",
            JobError::Spawn { .. } => "spawn_failure",
            JobError::Process { .. } => "process_failure",
            JobError::Timeout { .. } => "timeout",
            JobError::Cancelled => "cancelled",
            JobError::MissingStems { .. } => "missing_stems",
            JobError::Io(_) | JobError::Internal(_) => "internal",
        }
    }

    /// Diagnostic text for the response `details` field
    pub fn details(&self) -> Option<String> {
        match self {
            JobError::Capability { details, .. } => details.clone(),
            JobError::Spawn { program, source } => Some(format!("{}: {}", program, source)),
            JobError::Process { stderr, stdout, .. } => {
                let text = if !stderr.trim().is_empty() {
                    stderr.as_str()
                } else if !stdout.trim().is_empty() {
                    stdout.as_str()
                } else {
                    NO_DIAGNOSTICS
                };
                Some(text.to_string())
            }
            JobError::Timeout { after } => {
                Some(format!("No result after {} seconds; process killed", after.as_secs()))
            }
            JobError::Cancelled => None,
            JobError::MissingStems { expected_dir, .. } => {
                Some(format!("Expected files in: {}", expected_dir.display()))
            }
            JobError::Io(e) => Some(e.to_string()),
            JobError::Internal(msg) => Some(msg.clone()),
        }
    }

    /// Exit code of the external process, when it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobError::Process { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}
