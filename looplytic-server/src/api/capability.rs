//! Separation tool availability endpoint

use axum::{extract::State, Json};

use crate::services::CapabilityReport;
use crate::AppState;

/// GET /api/check-demucs
///
/// Spawns the import check on every call. Always answers 200; a missing
/// tool is reported in the body.
pub async fn check_demucs(State(state): State<AppState>) -> Json<CapabilityReport> {
    Json(state.capability.report(&state.shutdown).await)
}
