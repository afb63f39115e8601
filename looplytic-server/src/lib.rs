//! looplytic-server library - stem separation and audio analysis service
//!
//! Accepts audio uploads over HTTP, runs the external Python tool chain
//! (Demucs for separation, librosa for features and chords) and serves the
//! resulting stems.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

use config::ServiceConfig;
use services::{CapabilityProbe, ChordAnalyzer, JobRegistry, SeparationService};

/// Multipart framing allowance on top of the file size limit
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub separation: Arc<SeparationService>,
    pub chords: Arc<ChordAnalyzer>,
    pub capability: Arc<CapabilityProbe>,
    /// Jobs currently running, for health reporting
    pub jobs: JobRegistry,
    /// Cancelled on shutdown; kills in-flight tool processes
    pub shutdown: CancellationToken,
    pub startup_time: Instant,
    /// Message of the most recent job failure
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(config: ServiceConfig, shutdown: CancellationToken) -> Self {
        Self {
            separation: Arc::new(SeparationService::new(&config)),
            chords: Arc::new(ChordAnalyzer::new(&config.toolchain)),
            capability: Arc::new(CapabilityProbe::new(&config.toolchain)),
            config: Arc::new(config),
            jobs: JobRegistry::new(),
            shutdown,
            startup_time: Instant::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn record_error(&self, message: String) {
        *self
            .last_error
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_SLACK);

    let uploads = Router::new()
        .route("/api/separate", post(api::separate_audio))
        .route("/api/chord/analyze", post(api::analyze_chords))
        .layer(DefaultBodyLimit::max(body_limit));

    let static_files = Router::new()
        .nest_service("/separated", ServeDir::new(&state.config.separated_dir))
        .nest_service("/analyzed", ServeDir::new(&state.config.analyzed_dir));

    Router::new()
        .route("/api/check-demucs", get(api::check_demucs))
        .route("/api/buildinfo", get(api::get_build_info))
        .merge(api::health_routes())
        .merge(uploads)
        .merge(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
