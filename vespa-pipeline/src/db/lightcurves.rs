//! Folded lightcurve persistence

use crate::models::{Classification, FoldedLightcurve, PeriodCertainty};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const LIGHTCURVE_COLUMNS: &str = "id, star_id, period_number, period_length, sigma, chi_squared, \
     classification, period_certainty, classification_count, \
     image_version, image_job_id, image_attempted_at, external_image_url";

/// Fields supplied when registering a new candidate periodicity
#[derive(Debug, Clone)]
pub struct NewLightcurve {
    pub star_id: i64,
    pub period_number: i64,
    pub period_length: f64,
    pub sigma: f64,
    pub chi_squared: f64,
}

fn row_to_lightcurve(row: &sqlx::sqlite::SqliteRow) -> Result<FoldedLightcurve> {
    Ok(FoldedLightcurve {
        id: row.get("id"),
        star_id: row.get("star_id"),
        period_number: row.get("period_number"),
        period_length: row.get("period_length"),
        sigma: row.get("sigma"),
        chi_squared: row.get("chi_squared"),
        classification: row
            .get::<Option<i64>, _>("classification")
            .and_then(Classification::from_i64),
        period_certainty: row
            .get::<Option<i64>, _>("period_certainty")
            .and_then(PeriodCertainty::from_i64),
        classification_count: row.get("classification_count"),
        image_version: row.get("image_version"),
        image_job_id: parse_uuid(row.get("image_job_id"))?,
        image_attempted_at: parse_timestamp(row.get("image_attempted_at"))?,
        external_image_url: row.get("external_image_url"),
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

/// Get or create a lightcurve for (star, period_number)
pub async fn get_or_create_lightcurve(
    pool: &SqlitePool,
    new: &NewLightcurve,
) -> Result<FoldedLightcurve> {
    sqlx::query(
        r#"
        INSERT INTO lightcurves (star_id, period_number, period_length, sigma, chi_squared)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(star_id, period_number) DO UPDATE SET
            period_length = excluded.period_length,
            sigma = excluded.sigma,
            chi_squared = excluded.chi_squared
        "#,
    )
    .bind(new.star_id)
    .bind(new.period_number)
    .bind(new.period_length)
    .bind(new.sigma)
    .bind(new.chi_squared)
    .execute(pool)
    .await?;

    let row = sqlx::query(&format!(
        "SELECT {LIGHTCURVE_COLUMNS} FROM lightcurves WHERE star_id = ? AND period_number = ?"
    ))
    .bind(new.star_id)
    .bind(new.period_number)
    .fetch_one(pool)
    .await?;
    row_to_lightcurve(&row)
}

/// Load a lightcurve by primary key
pub async fn load_lightcurve(pool: &SqlitePool, id: i64) -> Result<Option<FoldedLightcurve>> {
    let row = sqlx::query(&format!(
        "SELECT {LIGHTCURVE_COLUMNS} FROM lightcurves WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_lightcurve).transpose()
}

/// Store the classification outcome for a lightcurve
pub async fn set_classification(
    pool: &SqlitePool,
    id: i64,
    classification: Option<Classification>,
    certainty: Option<PeriodCertainty>,
    count: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE lightcurves
        SET classification = ?, period_certainty = ?, classification_count = ?
        WHERE id = ?
        "#,
    )
    .bind(classification.map(|c| c as i64))
    .bind(certainty.map(|c| c as i64))
    .bind(count)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store the third-party subject image URL used as the render fallback
pub async fn set_external_image_url(pool: &SqlitePool, id: i64, url: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE lightcurves SET external_image_url = ? WHERE id = ?")
        .bind(url)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a newly submitted lightcurve image job
pub async fn record_image_job(
    pool: &SqlitePool,
    id: i64,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE lightcurves SET image_job_id = ?, image_attempted_at = ? WHERE id = ?")
        .bind(job_id.to_string())
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a lingering lightcurve image job handle
pub async fn clear_image_job(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE lightcurves SET image_job_id = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Commit rendered lightcurve images; version bump is the commit point
pub async fn persist_image_version(pool: &SqlitePool, id: i64, version: f64) -> Result<()> {
    sqlx::query("UPDATE lightcurves SET image_version = ?, image_job_id = NULL WHERE id = ?")
        .bind(version)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// All candidate periodicities for one star, in period-number order
pub async fn lightcurves_for_star(pool: &SqlitePool, star_id: i64) -> Result<Vec<FoldedLightcurve>> {
    let rows = sqlx::query(&format!(
        "SELECT {LIGHTCURVE_COLUMNS} FROM lightcurves WHERE star_id = ? ORDER BY period_number"
    ))
    .bind(star_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_lightcurve).collect()
}

/// Sweep selection: lightcurves whose images are missing or outdated.
///
/// Joins the owning star so lightcurves of given-up stars are excluded.
pub async fn lightcurves_needing_images(
    pool: &SqlitePool,
    current_version: f64,
    max_fetch_attempts: u32,
    limit: u32,
) -> Result<Vec<FoldedLightcurve>> {
    let rows = sqlx::query(
        r#"
        SELECT lc.id, lc.star_id, lc.period_number, lc.period_length, lc.sigma, lc.chi_squared,
               lc.classification, lc.period_certainty, lc.classification_count,
               lc.image_version, lc.image_job_id, lc.image_attempted_at, lc.external_image_url
        FROM lightcurves lc
        JOIN stars s ON s.id = lc.star_id
        WHERE (lc.image_version IS NULL OR lc.image_version < ?)
          AND s.fetch_failures < ?
        ORDER BY lc.id
        LIMIT ?
        "#,
    )
    .bind(current_version)
    .bind(max_fetch_attempts as i64)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_lightcurve).collect()
}
