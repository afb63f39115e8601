//! Stem separation endpoint

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use looplytic_common::{AudioFeatureRecord, StemName, StemSet};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::error::{ApiResult, JobError};
use crate::models::{JobFailure, JobOutcome, JobResponder, JobSuccess, SeparationJob};
use crate::services::{ActiveJob, UploadReceiver};
use crate::AppState;

const SUCCESS_MESSAGE: &str = "Separation completed successfully!";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparationResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub stems: StemSet,
    pub audio_analysis: AudioFeatureRecord,
    pub message: String,
    pub original_file: String,
    pub processing_time_ms: u64,
}

impl From<JobSuccess> for SeparationResponse {
    fn from(done: JobSuccess) -> Self {
        Self {
            success: true,
            session_id: done.session_id,
            stems: done.stems,
            audio_analysis: done.analysis,
            message: SUCCESS_MESSAGE.to_string(),
            original_file: done.original_file,
            processing_time_ms: done.processing_time.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparationFailureResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_stems: Option<Vec<StemName>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_analysis: Option<AudioFeatureRecord>,
}

impl From<&JobFailure> for SeparationFailureResponse {
    fn from(failure: &JobFailure) -> Self {
        let generated_stems = match &failure.error {
            JobError::MissingStems { generated, .. } => Some(generated.clone()),
            _ => None,
        };
        Self {
            success: false,
            session_id: failure.session_id,
            error: failure.error.to_string(),
            kind: failure.error.kind(),
            details: failure.error.details(),
            exit_code: failure.error.exit_code(),
            generated_stems,
            audio_analysis: failure.analysis.clone(),
        }
    }
}

impl IntoResponse for JobFailure {
    fn into_response(self) -> Response {
        let status = self.error.status();
        (status, Json(SeparationFailureResponse::from(&self))).into_response()
    }
}

fn outcome_response(outcome: JobOutcome) -> Response {
    match outcome {
        Ok(done) => (StatusCode::OK, Json(SeparationResponse::from(done))).into_response(),
        Err(failure) => failure.into_response(),
    }
}

/// POST /api/separate
///
/// Stores the upload, runs the job in its own task and waits for the job's
/// single response. The job keeps running (and cleans up) even if the
/// client disconnects.
pub async fn separate_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let receiver = UploadReceiver::for_separation(
        state.config.uploads_dir.clone(),
        state.config.max_upload_bytes,
    );
    let upload = receiver.receive(&mut multipart).await?;

    let job = SeparationJob::new(upload, &state.config.separated_dir);
    let session_id = job.session_id;
    let registration = state.jobs.register(ActiveJob {
        session_id,
        original_file: job.upload.original_filename.clone(),
        started_at: job.created_at,
    });
    let (responder, completion) = JobResponder::new(session_id);

    let task_state = state.clone();
    tokio::spawn(async move {
        let outcome = task_state.separation.run(job, &task_state.shutdown).await;
        drop(registration);
        if let Err(failure) = &outcome {
            task_state.record_error(failure.error.to_string());
        }
        responder.respond(outcome);
    });

    match completion.await {
        Ok(outcome) => Ok(outcome_response(outcome)),
        Err(_) => {
            error!(session_id = %session_id, "Job completion channel closed without a result");
            Ok(JobFailure::new(
                session_id,
                JobError::Internal("Job ended without producing a result".to_string()),
                None,
            )
            .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_failure_body_for_missing_stems() {
        let failure = JobFailure::new(
            Uuid::new_v4(),
            JobError::MissingStems {
                missing: vec![StemName::Other],
                expected_dir: PathBuf::from("/sep/j/htdemucs/a"),
                generated: vec![StemName::Vocals, StemName::Drums, StemName::Bass],
            },
            Some(AudioFeatureRecord::fallback()),
        );
        let body = serde_json::to_value(SeparationFailureResponse::from(&failure)).unwrap();

        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Missing stems: other");
        assert_eq!(body["kind"], "missing_stems");
        assert_eq!(body["generatedStems"], serde_json::json!(["vocals", "drums", "bass"]));
        assert_eq!(body["audioAnalysis"]["key"], "Unknown");
        assert!(body.get("exitCode").is_none());
    }

    #[test]
    fn test_failure_body_for_process_error() {
        let failure = JobFailure::new(
            Uuid::new_v4(),
            JobError::Process {
                exit_code: Some(1),
                stderr: "CUDA out of memory".to_string(),
                stdout: String::new(),
            },
            None,
        );
        let body = serde_json::to_value(SeparationFailureResponse::from(&failure)).unwrap();

        assert_eq!(body["error"], "Audio separation failed");
        assert_eq!(body["details"], "CUDA out of memory");
        assert_eq!(body["exitCode"], 1);
        assert!(body.get("audioAnalysis").is_none());
    }
}
