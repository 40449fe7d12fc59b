//! Periodic regeneration sweeps
//!
//! Three background tasks scan the catalogue for stale or missing derived
//! data and push the affected rows through the resolution pipeline. Batch
//! caps bound the work per tick; anything left over is picked up on a later
//! tick. Selection is stable primary-key order.

use crate::db::{lightcurves, stars};
use crate::models::{CURRENT_IMAGE_VERSION, CURRENT_STATS_VERSION};
use crate::pipeline::Pipeline;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};
use vespa_common::coords;

/// Start all sweep tasks
pub fn start_sweeps(pipeline: Arc<Pipeline>) {
    tokio::spawn(image_sweep_task(pipeline.clone()));
    tokio::spawn(statistics_sweep_task(pipeline.clone()));
    tokio::spawn(coordinate_backfill_task(pipeline));
}

/// Image sweep task - default every 120 seconds
async fn image_sweep_task(pipeline: Arc<Pipeline>) {
    let period = Duration::from_secs(pipeline.config().sweep.image_interval_secs);
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    info!("Image sweep task started ({}s interval)", period.as_secs());

    loop {
        interval.tick().await;
        match run_image_sweep(&pipeline, Utc::now()).await {
            Ok(n) if n > 0 => info!("Image sweep processed {} rows", n),
            Ok(_) => {}
            Err(e) => warn!("Image sweep failed: {:#}", e),
        }
    }
}

/// Statistics sweep task - default every 300 seconds
async fn statistics_sweep_task(pipeline: Arc<Pipeline>) {
    let period = Duration::from_secs(pipeline.config().sweep.stats_interval_secs);
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    info!("Statistics sweep task started ({}s interval)", period.as_secs());

    loop {
        interval.tick().await;
        match run_statistics_sweep(&pipeline, Utc::now()).await {
            Ok(n) if n > 0 => info!("Statistics sweep processed {} stars", n),
            Ok(_) => {}
            Err(e) => warn!("Statistics sweep failed: {:#}", e),
        }
    }
}

/// Coordinate backfill task - default every 60 seconds
async fn coordinate_backfill_task(pipeline: Arc<Pipeline>) {
    let period = Duration::from_secs(pipeline.config().sweep.coords_interval_secs);
    let batch = pipeline.config().sweep.coords_batch;
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    info!("Coordinate backfill task started ({}s interval)", period.as_secs());

    loop {
        interval.tick().await;
        match run_coordinate_backfill(pipeline.pool(), batch).await {
            Ok(n) if n > 0 => info!("Coordinate backfill updated {} stars", n),
            Ok(_) => {}
            Err(e) => warn!("Coordinate backfill failed: {:#}", e),
        }
    }
}

/// One image-sweep tick: trigger regeneration for stars and lightcurves
/// whose image artifact is missing or below the current version.
pub async fn run_image_sweep(pipeline: &Pipeline, now: DateTime<Utc>) -> Result<usize> {
    let config = pipeline.config();
    let batch = config.sweep.image_batch;
    let max_attempts = config.fetch_max_attempts;

    let star_batch =
        stars::stars_needing_images(pipeline.pool(), CURRENT_IMAGE_VERSION, max_attempts, batch)
            .await?;
    let lc_batch = lightcurves::lightcurves_needing_images(
        pipeline.pool(),
        CURRENT_IMAGE_VERSION,
        max_attempts,
        batch,
    )
    .await?;

    // One bad row must not starve the rest of the batch; log it and move on
    let mut processed = 0;
    for star in &star_batch {
        match pipeline.star_image_location(star, now).await {
            Ok(_) => processed += 1,
            Err(e) => warn!(star = %star.superwasp_id, "Image sweep row failed: {:#}", e),
        }
    }
    for lightcurve in &lc_batch {
        match pipeline.lightcurve_image_locations(lightcurve, now).await {
            Ok(_) => processed += 1,
            Err(e) => warn!(lightcurve_id = lightcurve.id, "Image sweep row failed: {:#}", e),
        }
    }
    Ok(processed)
}

/// One statistics-sweep tick
pub async fn run_statistics_sweep(pipeline: &Pipeline, now: DateTime<Utc>) -> Result<usize> {
    let config = pipeline.config();
    let star_batch = stars::stars_needing_statistics(
        pipeline.pool(),
        CURRENT_STATS_VERSION,
        config.fetch_max_attempts,
        config.sweep.stats_batch,
    )
    .await?;

    let mut processed = 0;
    for star in &star_batch {
        match pipeline.star_statistics(star, now).await {
            Ok(_) => processed += 1,
            Err(e) => warn!(star = %star.superwasp_id, "Statistics sweep row failed: {:#}", e),
        }
    }
    Ok(processed)
}

/// One coordinate-backfill tick: parse RA/Dec out of catalogue IDs for
/// rows that still lack a position. One-time per star; unparseable IDs are
/// logged and skipped.
pub async fn run_coordinate_backfill(pool: &SqlitePool, batch: u32) -> Result<usize> {
    let star_batch = stars::stars_missing_coordinates(pool, batch).await?;
    let mut updated = 0;
    for star in &star_batch {
        match coords::parse_catalogue_id(&star.superwasp_id) {
            Ok(pos) => {
                stars::set_coordinates(pool, star.id, pos.ra_deg, pos.dec_deg).await?;
                updated += 1;
            }
            Err(e) => {
                warn!(star = %star.superwasp_id, "Cannot backfill coordinates: {}", e);
            }
        }
    }
    Ok(updated)
}
