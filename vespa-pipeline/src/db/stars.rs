//! Star persistence
//!
//! Every write here is a full replace of the fields the calling job owns,
//! never a delta, so last-write-wins races cannot corrupt a row. The one
//! exception is `fetch_failures`, which is a read-increment-write and may
//! under-count on a true race; the dedup protocol makes that window tiny.

use crate::models::Star;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const STAR_COLUMNS: &str = "id, superwasp_id, ra_deg, dec_deg, fits_present, \
     fetch_job_id, fetch_attempted_at, fetch_failures, \
     image_version, image_job_id, image_attempted_at, \
     min_magnitude, mean_magnitude, max_magnitude, \
     stats_version, stats_job_id, stats_attempted_at";

fn row_to_star(row: &sqlx::sqlite::SqliteRow) -> Result<Star> {
    Ok(Star {
        id: row.get("id"),
        superwasp_id: row.get("superwasp_id"),
        ra_deg: row.get("ra_deg"),
        dec_deg: row.get("dec_deg"),
        fits_present: row.get::<i64, _>("fits_present") != 0,
        fetch_job_id: parse_uuid(row.get("fetch_job_id"))?,
        fetch_attempted_at: parse_timestamp(row.get("fetch_attempted_at"))?,
        fetch_failures: row.get::<i64, _>("fetch_failures") as u32,
        image_version: row.get("image_version"),
        image_job_id: parse_uuid(row.get("image_job_id"))?,
        image_attempted_at: parse_timestamp(row.get("image_attempted_at"))?,
        min_magnitude: row.get("min_magnitude"),
        mean_magnitude: row.get("mean_magnitude"),
        max_magnitude: row.get("max_magnitude"),
        stats_version: row.get("stats_version"),
        stats_job_id: parse_uuid(row.get("stats_job_id"))?,
        stats_attempted_at: parse_timestamp(row.get("stats_attempted_at"))?,
    })
}

fn parse_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.map(|s| Uuid::parse_str(&s).map_err(Into::into)).transpose()
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(Into::into)
        })
        .transpose()
}

/// Load a star by primary key
pub async fn load_star(pool: &SqlitePool, id: i64) -> Result<Option<Star>> {
    let row = sqlx::query(&format!("SELECT {STAR_COLUMNS} FROM stars WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_star).transpose()
}

/// Load a star by catalogue ID
pub async fn load_star_by_catalogue_id(
    pool: &SqlitePool,
    superwasp_id: &str,
) -> Result<Option<Star>> {
    let row = sqlx::query(&format!(
        "SELECT {STAR_COLUMNS} FROM stars WHERE superwasp_id = ?"
    ))
    .bind(superwasp_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_star).transpose()
}

/// Get or create a star by catalogue ID.
///
/// Stars are created on first reference; raw data and derived artifacts
/// arrive asynchronously afterwards.
pub async fn get_or_create_star(pool: &SqlitePool, superwasp_id: &str) -> Result<Star> {
    sqlx::query(
        r#"
        INSERT INTO stars (superwasp_id) VALUES (?)
        ON CONFLICT(superwasp_id) DO NOTHING
        "#,
    )
    .bind(superwasp_id)
    .execute(pool)
    .await?;

    load_star_by_catalogue_id(pool, superwasp_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("star vanished after get_or_create: {superwasp_id}"))
}

/// Record a newly submitted fetch job on the star
pub async fn record_fetch_job(
    pool: &SqlitePool,
    id: i64,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE stars SET fetch_job_id = ?, fetch_attempted_at = ? WHERE id = ?")
        .bind(job_id.to_string())
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a now-irrelevant fetch job handle
pub async fn clear_fetch_job(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE stars SET fetch_job_id = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark the raw blob as downloaded and usable
pub async fn mark_raw_present(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE stars SET fits_present = 1, fetch_job_id = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record one more fetch failure, clearing the presence flag.
///
/// Used both when a download fails and when a previously-fetched blob turns
/// out to be unreadable (corruption recovery).
pub async fn mark_raw_failed(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE stars
        SET fits_present = 0, fetch_job_id = NULL, fetch_failures = fetch_failures + 1
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a newly submitted star image job
pub async fn record_image_job(
    pool: &SqlitePool,
    id: i64,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE stars SET image_job_id = ?, image_attempted_at = ? WHERE id = ?")
        .bind(job_id.to_string())
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a lingering star image job handle
pub async fn clear_image_job(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE stars SET image_job_id = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Commit a rendered star image: the version bump is the commit point, so
/// it happens only after the blob write succeeded.
pub async fn persist_image_version(pool: &SqlitePool, id: i64, version: f64) -> Result<()> {
    sqlx::query("UPDATE stars SET image_version = ?, image_job_id = NULL WHERE id = ?")
        .bind(version)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a newly submitted statistics job
pub async fn record_stats_job(
    pool: &SqlitePool,
    id: i64,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE stars SET stats_job_id = ?, stats_attempted_at = ? WHERE id = ?")
        .bind(job_id.to_string())
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a lingering statistics job handle
pub async fn clear_stats_job(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE stars SET stats_job_id = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Persist derived magnitudes and the statistics version in one update
pub async fn persist_statistics(
    pool: &SqlitePool,
    id: i64,
    min: Option<f64>,
    mean: Option<f64>,
    max: Option<f64>,
    version: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE stars
        SET min_magnitude = ?, mean_magnitude = ?, max_magnitude = ?,
            stats_version = ?, stats_job_id = NULL
        WHERE id = ?
        "#,
    )
    .bind(min)
    .bind(mean)
    .bind(max)
    .bind(version)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Backfill the parsed sky position
pub async fn set_coordinates(pool: &SqlitePool, id: i64, ra_deg: f64, dec_deg: f64) -> Result<()> {
    sqlx::query("UPDATE stars SET ra_deg = ?, dec_deg = ? WHERE id = ?")
        .bind(ra_deg)
        .bind(dec_deg)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Sweep selection: stars whose image artifact is missing or outdated.
///
/// Excludes stars past the fetch failure threshold (their raw data will
/// never arrive). Stable primary-key order for deterministic batches.
pub async fn stars_needing_images(
    pool: &SqlitePool,
    current_version: f64,
    max_fetch_attempts: u32,
    limit: u32,
) -> Result<Vec<Star>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {STAR_COLUMNS} FROM stars
        WHERE (image_version IS NULL OR image_version < ?)
          AND fetch_failures < ?
        ORDER BY id
        LIMIT ?
        "#
    ))
    .bind(current_version)
    .bind(max_fetch_attempts as i64)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_star).collect()
}

/// Sweep selection: stars whose statistics are missing or outdated
pub async fn stars_needing_statistics(
    pool: &SqlitePool,
    current_version: f64,
    max_fetch_attempts: u32,
    limit: u32,
) -> Result<Vec<Star>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {STAR_COLUMNS} FROM stars
        WHERE (stats_version IS NULL OR stats_version < ?)
          AND fetch_failures < ?
        ORDER BY id
        LIMIT ?
        "#
    ))
    .bind(current_version)
    .bind(max_fetch_attempts as i64)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_star).collect()
}

/// Sweep selection: stars still missing a parsed sky position
pub async fn stars_missing_coordinates(pool: &SqlitePool, limit: u32) -> Result<Vec<Star>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {STAR_COLUMNS} FROM stars
        WHERE ra_deg IS NULL OR dec_deg IS NULL
        ORDER BY id
        LIMIT ?
        "#
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_star).collect()
}

/// Row counts for the status surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct StarCounts {
    pub total: i64,
    pub raw_present: i64,
    pub given_up: i64,
    pub stats_current: i64,
    pub images_current: i64,
}

pub async fn count_stars(
    pool: &SqlitePool,
    current_stats_version: f64,
    current_image_version: f64,
    max_fetch_attempts: u32,
) -> Result<StarCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(fits_present), 0) AS raw_present,
            COALESCE(SUM(fetch_failures >= ?), 0) AS given_up,
            COALESCE(SUM(stats_version >= ?), 0) AS stats_current,
            COALESCE(SUM(image_version >= ?), 0) AS images_current
        FROM stars
        "#,
    )
    .bind(max_fetch_attempts as i64)
    .bind(current_stats_version)
    .bind(current_image_version)
    .fetch_one(pool)
    .await?;

    Ok(StarCounts {
        total: row.get("total"),
        raw_present: row.get("raw_present"),
        given_up: row.get("given_up"),
        stats_current: row.get("stats_current"),
        images_current: row.get("images_current"),
    })
}
