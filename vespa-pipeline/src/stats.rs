//! Derived magnitude statistics
//!
//! The `ComputeStatistics` job body. Data-quality problems never escape the
//! job: missing raw data is an early return, a corrupt blob delegates to
//! the fetcher's recovery path, and per-aggregate numeric failures persist
//! as NULL rather than aborting the update.

use crate::db::stars;
use crate::fetcher;
use crate::models::CURRENT_STATS_VERSION;
use crate::signal::{self, Aggregate, ClipParams, SignalError};
use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info, warn};

/// Compute and persist min/mean/max magnitude for one star.
///
/// Idempotent: re-running over unchanged raw data persists identical
/// values. All three magnitudes and the statistics version land in a
/// single update.
pub async fn run_statistics_job(
    pool: &SqlitePool,
    photometry_dir: &Path,
    clip: &ClipParams,
    star_id: i64,
) -> Result<()> {
    let Some(star) = stars::load_star(pool, star_id).await? else {
        warn!(star_id, "Statistics job for unknown star; dropping");
        return Ok(());
    };

    let Some(series) = fetcher::load_raw(pool, photometry_dir, &star).await? else {
        debug!(star = %star.superwasp_id, "Raw data not ready; skipping statistics");
        return Ok(());
    };

    let min = magnitude_or_null(&star.superwasp_id, &series.flux, Aggregate::Min, clip);
    let mean = magnitude_or_null(&star.superwasp_id, &series.flux, Aggregate::Mean, clip);
    let max = magnitude_or_null(&star.superwasp_id, &series.flux, Aggregate::Max, clip);

    stars::persist_statistics(pool, star.id, min, mean, max, CURRENT_STATS_VERSION).await?;
    info!(
        star = %star.superwasp_id,
        ?min, ?mean, ?max,
        version = CURRENT_STATS_VERSION,
        "Statistics persisted"
    );
    Ok(())
}

fn magnitude_or_null(
    superwasp_id: &str,
    flux: &[f64],
    aggregate: Aggregate,
    clip: &ClipParams,
) -> Option<f64> {
    match signal::extract_magnitude(flux, aggregate, clip) {
        Ok(mag) => Some(mag),
        Err(SignalError::EmptyInput(reason)) | Err(SignalError::InsufficientData(reason)) => {
            debug!(star = %superwasp_id, ?aggregate, "No magnitude: {}", reason);
            None
        }
    }
}
