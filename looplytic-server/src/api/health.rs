//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::ActiveJob;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: String,
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_jobs: usize,
    /// Running separation jobs, oldest first
    pub jobs: Vec<ActiveJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let jobs = state.jobs.snapshot();
    Json(HealthResponse {
        status: "ok".to_string(),
        mode: "production".to_string(),
        timestamp: looplytic_common::time::now(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.startup_time.elapsed().as_secs(),
        active_jobs: jobs.len(),
        jobs,
        last_error: state.last_error(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}
