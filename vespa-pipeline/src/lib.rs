//! vespa-pipeline library interface
//!
//! The asynchronous derived-data pipeline for the variable-star catalogue:
//! raw photometry fetching, the artifact staleness/dedup protocol, the
//! statistics and image generators, and the periodic sweeps that drive
//! them.

pub mod api;
pub mod cache;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod images;
pub mod jobs;
pub mod models;
pub mod photometry;
pub mod pipeline;
pub mod plot;
pub mod signal;
pub mod stats;
pub mod sweep;

pub use crate::error::{ApiError, ApiResult};
pub use crate::pipeline::Pipeline;

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The derived-data pipeline (store + job runner + config)
    pub pipeline: Arc<Pipeline>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let images_dir = state.pipeline.config().images_dir();
    Router::new()
        .merge(api::routes())
        // Generated artifact blobs, referenced by the URLs the pipeline hands out
        .nest_service("/files/images", ServeDir::new(images_dir))
        .with_state(state)
}
