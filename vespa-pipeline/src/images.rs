//! Image generation jobs
//!
//! Renders the whole-lightcurve scatter for a star and the phase-folded
//! scatter (plus thumbnail) for each candidate periodicity. Blobs are
//! written before the version column moves: the version bump is the commit
//! point, so a reader can never observe a current version with a missing
//! blob.

use crate::db::{lightcurves, stars};
use crate::fetcher;
use crate::models::CURRENT_IMAGE_VERSION;
use crate::plot::ScatterPlot;
use crate::signal::{self, ClipParams};
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Thumbnail bounding box (width, height)
pub const THUMBNAIL_MAX: (u32, u32) = (100, 60);

/// Path of a star's full-lightcurve image
pub fn star_image_path(images_dir: &Path, star_id: i64) -> PathBuf {
    images_dir.join(format!("star-{star_id}.png"))
}

/// Path of a lightcurve's folded image
pub fn lightcurve_image_path(images_dir: &Path, lightcurve_id: i64) -> PathBuf {
    images_dir.join(format!("lc-{lightcurve_id}.png"))
}

/// Path of a lightcurve's thumbnail
pub fn lightcurve_thumbnail_path(images_dir: &Path, lightcurve_id: i64) -> PathBuf {
    images_dir.join(format!("lc-{lightcurve_id}-thumb.png"))
}

/// Job body: render the whole-lightcurve scatter for one star.
pub async fn run_star_image_job(
    pool: &SqlitePool,
    photometry_dir: &Path,
    images_dir: &Path,
    clip: &ClipParams,
    star_id: i64,
) -> Result<()> {
    let Some(star) = stars::load_star(pool, star_id).await? else {
        warn!(star_id, "Image job for unknown star; dropping");
        return Ok(());
    };
    let Some(series) = fetcher::load_raw(pool, photometry_dir, &star).await? else {
        debug!(star = %star.superwasp_id, "Raw data not ready; skipping star image");
        return Ok(());
    };

    let keep = signal::clip_outliers(&series.flux, clip);
    let img = ScatterPlot::default().render(&series, &keep);
    write_png(&img, &star_image_path(images_dir, star.id)).await?;

    stars::persist_image_version(pool, star.id, CURRENT_IMAGE_VERSION).await?;
    info!(star = %star.superwasp_id, version = CURRENT_IMAGE_VERSION, "Star image rendered");
    Ok(())
}

/// Job body: render the folded scatter and thumbnail for one lightcurve.
pub async fn run_lightcurve_images_job(
    pool: &SqlitePool,
    photometry_dir: &Path,
    images_dir: &Path,
    clip: &ClipParams,
    lightcurve_id: i64,
) -> Result<()> {
    let Some(lightcurve) = lightcurves::load_lightcurve(pool, lightcurve_id).await? else {
        warn!(lightcurve_id, "Image job for unknown lightcurve; dropping");
        return Ok(());
    };
    let Some(star) = stars::load_star(pool, lightcurve.star_id).await? else {
        warn!(lightcurve_id, "Lightcurve orphaned from its star; dropping");
        return Ok(());
    };
    let Some(series) = fetcher::load_raw(pool, photometry_dir, &star).await? else {
        debug!(star = %star.superwasp_id, "Raw data not ready; skipping lightcurve images");
        return Ok(());
    };

    let folded = match signal::fold(&series, lightcurve.period_length) {
        Ok(folded) => folded,
        Err(e) => {
            // Data-quality problem, not a job failure: leave the artifact
            // stale and let a corrected period or re-fetch resolve it
            warn!(lightcurve_id, "Cannot fold series: {}", e);
            return Ok(());
        }
    };
    let display = signal::extend_for_display(&folded);
    let keep = signal::clip_outliers(&display.flux, clip);

    let img = ScatterPlot::default().render(&display, &keep);
    let thumbnail = make_thumbnail(&img);

    write_png(&img, &lightcurve_image_path(images_dir, lightcurve.id)).await?;
    write_png(&thumbnail, &lightcurve_thumbnail_path(images_dir, lightcurve.id)).await?;

    lightcurves::persist_image_version(pool, lightcurve.id, CURRENT_IMAGE_VERSION).await?;
    info!(
        star = %star.superwasp_id,
        lightcurve_id,
        period_s = lightcurve.period_length,
        version = CURRENT_IMAGE_VERSION,
        "Lightcurve images rendered"
    );
    Ok(())
}

/// Downsize a raster to the thumbnail bounding box, preserving aspect ratio
fn make_thumbnail(img: &RgbImage) -> RgbImage {
    let (max_w, max_h) = THUMBNAIL_MAX;
    let scale = f64::min(
        max_w as f64 / img.width() as f64,
        max_h as f64 / img.height() as f64,
    )
    .min(1.0);
    let w = ((img.width() as f64 * scale) as u32).max(1);
    let h = ((img.height() as f64 * scale) as u32).max(1);
    imageops::resize(img, w, h, FilterType::Nearest)
}

/// Write a raster atomically (tmp + rename) so readers never see a partial
/// blob at the published path.
async fn write_png(img: &RgbImage, path: &Path) -> Result<()> {
    let tmp = path.with_extension("png.tmp");
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| format!("PNG encode failed for {}", path.display()))?;
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
