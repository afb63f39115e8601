//! Chord analysis endpoint

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::error::ApiResult;
use crate::services::chord_analyzer::{ChordAnalysis, ANALYZED_URL_PREFIX};
use crate::services::UploadReceiver;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordResponse {
    #[serde(flatten)]
    pub analysis: ChordAnalysis,
    /// Public URL of the retained upload
    pub audio_url: String,
    /// Client-supplied file name
    pub filename: String,
}

/// POST /api/chord/analyze
///
/// The upload is kept on success so the client can play it back; it is
/// removed if analysis fails.
pub async fn analyze_chords(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChordResponse>> {
    let receiver = UploadReceiver::for_analysis(
        state.config.analyzed_dir.clone(),
        state.config.max_upload_bytes,
    );
    let upload = receiver.receive(&mut multipart).await?;

    let analysis = match state
        .chords
        .analyze(&upload.stored_path, &state.shutdown)
        .await
    {
        Ok(analysis) => analysis,
        Err(e) => {
            upload.remove().await;
            return Err(e.into());
        }
    };

    let audio_url = format!("{}/{}", ANALYZED_URL_PREFIX, upload.file_name());
    let filename = upload.original_filename.clone();
    let kept = upload.persist();
    info!(path = %kept.display(), "Analyzed upload retained");

    Ok(Json(ChordResponse {
        analysis,
        audio_url,
        filename,
    }))
}
