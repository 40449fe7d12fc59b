//! High-level artifact resolution
//!
//! Ties the decision functions to the store and the job runner. Every
//! method returns immediately with a usable value (fresh URL, stale
//! fallback, or placeholder) and persists whatever state change the
//! decision produced. Nothing here waits for a job.

use crate::cache::{self, ArtifactState, StateChange};
use crate::db::{lightcurves, stars};
use crate::fetcher::{self, ArchiveClient, FetchOutcome, FetchPolicy};
use crate::images;
use crate::jobs::{Job, JobExecutor, JobSubmitter};
use crate::models::{FoldedLightcurve, Star, CURRENT_IMAGE_VERSION, CURRENT_STATS_VERSION};
use crate::signal::ClipParams;
use crate::stats;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use vespa_common::Config;

/// Served when no artifact and no third-party fallback exists
pub const PLACEHOLDER_IMAGE_URL: &str = "/static/placeholder.png";

/// Image and thumbnail URLs for one lightcurve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightcurveImageUrls {
    pub image: String,
    pub thumbnail: String,
}

/// Current (possibly stale) statistics for a star
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct StarStatistics {
    pub min_magnitude: Option<f64>,
    pub mean_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
}

/// The derived-data pipeline over one store and one job runner
pub struct Pipeline {
    pool: SqlitePool,
    config: Arc<Config>,
    submitter: Arc<dyn JobSubmitter>,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, config: Arc<Config>, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self {
            pool,
            config,
            submitter,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_attempts: self.config.fetch_max_attempts,
            liveness_window: Duration::seconds(self.config.job_liveness_window_secs as i64),
        }
    }

    fn liveness_window(&self) -> Duration {
        Duration::seconds(self.config.job_liveness_window_secs as i64)
    }

    fn photometry_dir(&self) -> PathBuf {
        self.config.photometry_dir()
    }

    fn images_dir(&self) -> PathBuf {
        self.config.images_dir()
    }

    /// Trigger (or confirm) the raw-data fetch for a star
    pub async fn ensure_fetched(&self, star: &Star, now: DateTime<Utc>) -> Result<FetchOutcome> {
        fetcher::ensure_fetched(
            &self.pool,
            &self.photometry_dir(),
            star.id,
            &self.fetch_policy(),
            self.submitter.as_ref(),
            now,
        )
        .await
    }

    /// Resolve the whole-lightcurve image for a star.
    ///
    /// Fresh artifact: its URL. Otherwise: the placeholder, with the fetch
    /// and render pipeline kicked off in the background.
    pub async fn star_image_location(&self, star: &Star, now: DateTime<Utc>) -> Result<String> {
        self.ensure_fetched(star, now).await?;

        let state = ArtifactState {
            blob_exists: images::star_image_path(&self.images_dir(), star.id).exists(),
            version: star.image_version,
            job_id: star.image_job_id,
            last_attempt: star.image_attempted_at,
        };
        let resolution = cache::get_or_generate(
            &state,
            CURRENT_IMAGE_VERSION,
            self.liveness_window(),
            now,
            self.submitter.as_ref(),
            Job::RenderStarImage { star_id: star.id },
            &format!("/files/images/star-{}.png", star.id),
            PLACEHOLDER_IMAGE_URL,
        );
        self.persist_star_image_change(star.id, &resolution.change).await?;
        Ok(resolution.url)
    }

    /// Resolve the folded image and thumbnail for a lightcurve.
    ///
    /// One staleness decision covers both blobs (they are rendered by the
    /// same job and committed by the same version bump). The fallback
    /// prefers the stored third-party subject image over the placeholder.
    pub async fn lightcurve_image_locations(
        &self,
        lightcurve: &FoldedLightcurve,
        now: DateTime<Utc>,
    ) -> Result<LightcurveImageUrls> {
        if let Some(star) = stars::load_star(&self.pool, lightcurve.star_id).await? {
            self.ensure_fetched(&star, now).await?;
        }

        let images_dir = self.images_dir();
        let state = ArtifactState {
            blob_exists: images::lightcurve_image_path(&images_dir, lightcurve.id).exists()
                && images::lightcurve_thumbnail_path(&images_dir, lightcurve.id).exists(),
            version: lightcurve.image_version,
            job_id: lightcurve.image_job_id,
            last_attempt: lightcurve.image_attempted_at,
        };
        let fallback = lightcurve
            .external_image_url
            .clone()
            .unwrap_or_else(|| PLACEHOLDER_IMAGE_URL.to_string());
        let resolution = cache::get_or_generate(
            &state,
            CURRENT_IMAGE_VERSION,
            self.liveness_window(),
            now,
            self.submitter.as_ref(),
            Job::RenderLightcurveImages {
                lightcurve_id: lightcurve.id,
            },
            &format!("/files/images/lc-{}.png", lightcurve.id),
            &fallback,
        );

        let urls = if resolution.url == fallback {
            LightcurveImageUrls {
                image: fallback.clone(),
                thumbnail: fallback,
            }
        } else {
            LightcurveImageUrls {
                image: resolution.url,
                thumbnail: format!("/files/images/lc-{}-thumb.png", lightcurve.id),
            }
        };

        match &resolution.change {
            StateChange { record_job: Some((job_id, at)), .. } => {
                lightcurves::record_image_job(&self.pool, lightcurve.id, *job_id, *at).await?;
            }
            StateChange { clear_job: true, .. } => {
                lightcurves::clear_image_job(&self.pool, lightcurve.id).await?;
            }
            _ => {}
        }
        Ok(urls)
    }

    /// Resolve the derived statistics for a star.
    ///
    /// Returns whatever is stored right now (possibly NULLs) and triggers
    /// recomputation when the stored statistics version is stale.
    pub async fn star_statistics(&self, star: &Star, now: DateTime<Utc>) -> Result<StarStatistics> {
        self.ensure_fetched(star, now).await?;

        let state = ArtifactState {
            // Statistics have no blob; a recorded version means the job ran
            blob_exists: star.stats_version.is_some(),
            version: star.stats_version,
            job_id: star.stats_job_id,
            last_attempt: star.stats_attempted_at,
        };
        let decision = cache::assess(
            &state,
            CURRENT_STATS_VERSION,
            self.liveness_window(),
            now,
            |id| self.submitter.is_finished(id),
        );
        match decision {
            cache::ArtifactDecision::Fresh { clear_job } => {
                if clear_job {
                    if let Some(job_id) = star.stats_job_id {
                        self.submitter.forget(job_id);
                    }
                    stars::clear_stats_job(&self.pool, star.id).await?;
                }
            }
            cache::ArtifactDecision::Stale { submit } => {
                if submit {
                    let job_id = self
                        .submitter
                        .submit(Job::ComputeStatistics { star_id: star.id });
                    stars::record_stats_job(&self.pool, star.id, job_id, now).await?;
                }
            }
        }

        Ok(StarStatistics {
            min_magnitude: star.min_magnitude,
            mean_magnitude: star.mean_magnitude,
            max_magnitude: star.max_magnitude,
        })
    }

    async fn persist_star_image_change(&self, star_id: i64, change: &StateChange) -> Result<()> {
        if let Some((job_id, at)) = change.record_job {
            stars::record_image_job(&self.pool, star_id, job_id, at).await?;
        } else if change.clear_job {
            stars::clear_image_job(&self.pool, star_id).await?;
        }
        Ok(())
    }
}

/// Execution context for job bodies.
///
/// Deliberately separate from [`Pipeline`]: jobs read raw data and write
/// artifacts but never submit further jobs, so they need no submitter and
/// no cycle exists between runner and executor.
pub struct PipelineExecutor {
    pool: SqlitePool,
    config: Arc<Config>,
    archive: ArchiveClient,
}

impl PipelineExecutor {
    pub fn new(pool: SqlitePool, config: Arc<Config>) -> Self {
        let archive = ArchiveClient::new(
            &config.archive_base_url,
            std::time::Duration::from_secs(config.fetch_timeout_secs),
        );
        Self {
            pool,
            config,
            archive,
        }
    }

    fn clip_params(&self) -> ClipParams {
        ClipParams {
            flux_bound: self.config.clip_flux_bound,
            sigma: self.config.clip_sigma,
        }
    }
}

#[async_trait::async_trait]
impl JobExecutor for PipelineExecutor {
    async fn execute(&self, job: Job) -> Result<()> {
        let photometry_dir = self.config.photometry_dir();
        let images_dir = self.config.images_dir();
        match job {
            Job::FetchRawData { star_id } => {
                fetcher::run_fetch_job(&self.pool, &self.archive, &photometry_dir, star_id).await
            }
            Job::ComputeStatistics { star_id } => {
                stats::run_statistics_job(&self.pool, &photometry_dir, &self.clip_params(), star_id)
                    .await
            }
            Job::RenderStarImage { star_id } => {
                images::run_star_image_job(
                    &self.pool,
                    &photometry_dir,
                    &images_dir,
                    &self.clip_params(),
                    star_id,
                )
                .await
            }
            Job::RenderLightcurveImages { lightcurve_id } => {
                images::run_lightcurve_images_job(
                    &self.pool,
                    &photometry_dir,
                    &images_dir,
                    &self.clip_params(),
                    lightcurve_id,
                )
                .await
            }
        }
    }
}
