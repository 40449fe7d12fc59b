//! Raw photometry fetching
//!
//! Downloads a star's raw time series from the external archive into the
//! photometry directory, guarded by the same handle + liveness-window dedup
//! protocol as the derived artifact cache. Failures are counted per star;
//! past the attempt threshold the star is given up on and surfaced to
//! callers as unavailable.

use crate::cache::pending_job_live;
use crate::db::stars;
use crate::jobs::{Job, JobSubmitter};
use crate::models::Star;
use crate::photometry;
use crate::signal::Timeseries;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fetch retry policy, derived from config
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Downloads attempted before the star is given up on
    pub max_attempts: u32,
    /// Pending-job liveness window
    pub liveness_window: Duration,
}

/// Raw-data fetch state of one star
#[derive(Debug, Clone, Copy)]
pub struct FetchState {
    pub present: bool,
    pub job_id: Option<Uuid>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub failures: u32,
}

impl From<&Star> for FetchState {
    fn from(star: &Star) -> Self {
        Self {
            present: star.fits_present,
            job_id: star.fetch_job_id,
            attempted_at: star.fetch_attempted_at,
            failures: star.fetch_failures,
        }
    }
}

/// Outcome of the fetch decision table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// Raw data is on disk; a lingering handle should be released
    Present { clear_job: bool },
    /// Attempt threshold reached; never retried again
    GivenUp,
    /// Data absent; submit a new fetch job iff none is live
    Pending { submit: bool },
}

/// What a caller gets back from [`ensure_fetched`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Blob is on disk at this path
    Ready(PathBuf),
    /// Download in flight (or just submitted); try again later
    Pending,
    /// Terminal give-up state
    Unavailable,
}

/// Evaluate the fetch decision table for one star.
pub fn assess_fetch(
    state: &FetchState,
    policy: &FetchPolicy,
    now: DateTime<Utc>,
    job_finished: impl Fn(Uuid) -> bool,
) -> FetchDecision {
    if state.present {
        return FetchDecision::Present {
            clear_job: state.job_id.is_some(),
        };
    }
    if state.failures >= policy.max_attempts {
        return FetchDecision::GivenUp;
    }
    let live = pending_job_live(
        state.job_id,
        state.attempted_at,
        policy.liveness_window,
        now,
        job_finished,
    );
    FetchDecision::Pending { submit: !live }
}

/// Path of a star's raw photometry blob
pub fn photometry_path(photometry_dir: &Path, superwasp_id: &str) -> PathBuf {
    photometry_dir.join(format!("{}.dat", superwasp_id.replace(' ', "_")))
}

/// Ensure a star's raw data is fetched, submitting at most one live fetch
/// job per liveness window. Never blocks on the download.
///
/// Re-reads the star row before deciding: a single request resolves several
/// artifacts for the same star, and each resolution must observe the fetch
/// handle the previous one persisted, not the caller's stale snapshot.
pub async fn ensure_fetched(
    pool: &SqlitePool,
    photometry_dir: &Path,
    star_id: i64,
    policy: &FetchPolicy,
    submitter: &dyn JobSubmitter,
    now: DateTime<Utc>,
) -> Result<FetchOutcome> {
    let Some(star) = stars::load_star(pool, star_id).await? else {
        anyhow::bail!("fetch requested for unknown star {star_id}");
    };
    let state = FetchState::from(&star);
    match assess_fetch(&state, policy, now, |id| submitter.is_finished(id)) {
        FetchDecision::Present { clear_job } => {
            if clear_job {
                if let Some(job_id) = star.fetch_job_id {
                    submitter.forget(job_id);
                }
                stars::clear_fetch_job(pool, star.id).await?;
            }
            Ok(FetchOutcome::Ready(photometry_path(
                photometry_dir,
                &star.superwasp_id,
            )))
        }
        FetchDecision::GivenUp => Ok(FetchOutcome::Unavailable),
        FetchDecision::Pending { submit } => {
            if submit {
                let job_id = submitter.submit(Job::FetchRawData { star_id: star.id });
                stars::record_fetch_job(pool, star.id, job_id, now).await?;
                debug!(star = %star.superwasp_id, %job_id, "Submitted raw data fetch");
            }
            Ok(FetchOutcome::Pending)
        }
    }
}

/// HTTP client for the external photometry archive
#[derive(Clone)]
pub struct ArchiveClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ArchiveClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One GET per star, keyed by catalogue ID.
    pub async fn download(&self, superwasp_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/{}.dat",
            self.base_url,
            superwasp_id.replace(' ', "_")
        );
        debug!(%url, "Downloading raw photometry");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("archive request failed for {superwasp_id}"))?
            .error_for_status()
            .with_context(|| format!("archive rejected request for {superwasp_id}"))?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Job body: download one star's raw data and persist it.
///
/// Network or decode failure increments the failure counter; the bounded
/// retry logic in [`ensure_fetched`] decides whether another attempt ever
/// happens.
pub async fn run_fetch_job(
    pool: &SqlitePool,
    archive: &ArchiveClient,
    photometry_dir: &Path,
    star_id: i64,
) -> Result<()> {
    let Some(star) = stars::load_star(pool, star_id).await? else {
        warn!(star_id, "Fetch job for unknown star; dropping");
        return Ok(());
    };

    let bytes = match archive.download(&star.superwasp_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(star = %star.superwasp_id, "Archive download failed: {:#}", e);
            stars::mark_raw_failed(pool, star.id).await?;
            return Ok(());
        }
    };

    // Validate before persisting so a garbage payload counts as a failure
    // now instead of a corruption discovery later
    if let Err(e) = photometry::decode(&bytes) {
        warn!(star = %star.superwasp_id, "Archive payload undecodable: {}", e);
        stars::mark_raw_failed(pool, star.id).await?;
        return Ok(());
    }

    let path = photometry_path(photometry_dir, &star.superwasp_id);
    let tmp = path.with_extension("dat.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;

    stars::mark_raw_present(pool, star.id).await?;
    info!(star = %star.superwasp_id, bytes = bytes.len(), "Raw photometry stored");
    Ok(())
}

/// Read and decode a star's raw data for a generation job.
///
/// Returns `None` when the data is not ready. A read or decode failure of a
/// supposedly-present blob clears the presence flag and counts a failure,
/// so the next `ensure_fetched` re-downloads (bounded by the threshold).
pub async fn load_raw(
    pool: &SqlitePool,
    photometry_dir: &Path,
    star: &Star,
) -> Result<Option<Timeseries>> {
    if !star.fits_present {
        return Ok(None);
    }
    let path = photometry_path(photometry_dir, &star.superwasp_id);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(star = %star.superwasp_id, path = %path.display(),
                  "Raw blob unreadable, scheduling re-fetch: {}", e);
            stars::mark_raw_failed(pool, star.id).await?;
            return Ok(None);
        }
    };
    match photometry::decode(&bytes) {
        Ok(series) => Ok(Some(series)),
        Err(e) => {
            warn!(star = %star.superwasp_id, "Raw blob corrupt, scheduling re-fetch: {}", e);
            stars::mark_raw_failed(pool, star.id).await?;
            Ok(None)
        }
    }
}
