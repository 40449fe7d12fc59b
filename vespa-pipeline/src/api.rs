//! Operational HTTP surface
//!
//! Not the catalogue UI: a small status and on-demand trigger API, plus
//! static serving of the generated artifact blobs. Handlers never wait on
//! the pipeline; they return whatever is servable right now.

use crate::db::{lightcurves, stars};
use crate::error::{ApiError, ApiResult};
use crate::fetcher::FetchOutcome;
use crate::models::{FoldedLightcurve, Star, CURRENT_IMAGE_VERSION, CURRENT_STATS_VERSION};
use crate::pipeline::StarStatistics;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/stars/:swasp_id", get(star_detail))
        .route("/stars/:swasp_id/refresh", post(refresh_star))
}

/// Liveness probe
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (Utc::now() - state.startup_time).num_seconds(),
    }))
}

/// Catalogue-wide pipeline progress counts
async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let config = state.pipeline.config();
    let counts = stars::count_stars(
        state.pipeline.pool(),
        CURRENT_STATS_VERSION,
        CURRENT_IMAGE_VERSION,
        config.fetch_max_attempts,
    )
    .await?;
    Ok(Json(json!({ "stars": counts })))
}

/// Star detail: current statistics and artifact URLs.
///
/// Reading a star is also the on-demand trigger path: stale or missing
/// derived data starts regenerating in the background while the response
/// carries fallbacks.
async fn star_detail(
    State(state): State<AppState>,
    Path(swasp_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let pipeline = &state.pipeline;
    let star = stars::load_star_by_catalogue_id(pipeline.pool(), &swasp_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(swasp_id.clone()))?;

    let now = Utc::now();
    let statistics = pipeline.star_statistics(&star, now).await?;
    let image_url = pipeline.star_image_location(&star, now).await?;

    let mut lightcurve_views = Vec::new();
    for lightcurve in star_lightcurves(&state, star.id).await? {
        let urls = pipeline.lightcurve_image_locations(&lightcurve, now).await?;
        lightcurve_views.push(json!({
            "id": lightcurve.id,
            "period_number": lightcurve.period_number,
            "period_length": lightcurve.period_length,
            "sigma": lightcurve.sigma,
            "chi_squared": lightcurve.chi_squared,
            "classification": lightcurve.classification.map(|c| c as i64),
            "period_certainty": lightcurve.period_certainty.map(|c| c as i64),
            "classification_count": lightcurve.classification_count,
            "image_url": urls.image,
            "thumbnail_url": urls.thumbnail,
        }));
    }

    Ok(Json(star_json(&star, &statistics, &image_url, lightcurve_views)))
}

/// Explicitly kick the fetch/derive pipeline for a star
async fn refresh_star(
    State(state): State<AppState>,
    Path(swasp_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let pipeline = &state.pipeline;
    let star = stars::load_star_by_catalogue_id(pipeline.pool(), &swasp_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(swasp_id.clone()))?;

    let now = Utc::now();
    let fetch = pipeline.ensure_fetched(&star, now).await?;
    let statistics = pipeline.star_statistics(&star, now).await?;
    let image_url = pipeline.star_image_location(&star, now).await?;

    let fetch_state = match fetch {
        FetchOutcome::Ready(_) => "ready",
        FetchOutcome::Pending => "pending",
        FetchOutcome::Unavailable => "unavailable",
    };
    let mut body = star_json(&star, &statistics, &image_url, Vec::new());
    body["raw_data"] = json!(fetch_state);
    Ok(Json(body))
}

async fn star_lightcurves(state: &AppState, star_id: i64) -> ApiResult<Vec<FoldedLightcurve>> {
    lightcurves::lightcurves_for_star(state.pipeline.pool(), star_id)
        .await
        .map_err(Into::into)
}

fn star_json(
    star: &Star,
    statistics: &StarStatistics,
    image_url: &str,
    lightcurve_views: Vec<Value>,
) -> Value {
    json!({
        "superwasp_id": star.superwasp_id,
        "ra_deg": star.ra_deg,
        "dec_deg": star.dec_deg,
        "statistics": statistics,
        "image_url": image_url,
        "lightcurves": lightcurve_views,
    })
}
