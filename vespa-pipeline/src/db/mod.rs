//! Database access for the pipeline
//!
//! SQLite via sqlx. The pipeline consumes the store as a plain structured
//! store: get-by-key, get-or-create, filtered batch selection, counts.
//! All artifact state lives on the owning rows.

pub mod lightcurves;
pub mod stars;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the pipeline tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stars (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            superwasp_id TEXT NOT NULL UNIQUE,
            ra_deg REAL,
            dec_deg REAL,
            fits_present INTEGER NOT NULL DEFAULT 0,
            fetch_job_id TEXT,
            fetch_attempted_at TEXT,
            fetch_failures INTEGER NOT NULL DEFAULT 0,
            image_version REAL,
            image_job_id TEXT,
            image_attempted_at TEXT,
            min_magnitude REAL,
            mean_magnitude REAL,
            max_magnitude REAL,
            stats_version REAL,
            stats_job_id TEXT,
            stats_attempted_at TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lightcurves (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            star_id INTEGER NOT NULL REFERENCES stars(id) ON DELETE CASCADE,
            period_number INTEGER NOT NULL,
            period_length REAL NOT NULL,
            sigma REAL NOT NULL,
            chi_squared REAL NOT NULL,
            classification INTEGER,
            period_certainty INTEGER,
            classification_count INTEGER,
            image_version REAL,
            image_job_id TEXT,
            image_attempted_at TEXT,
            external_image_url TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(star_id, period_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (stars, lightcurves)");

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // Single connection: every pooled connection to :memory: would
    // otherwise open its own empty database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    pool
}
