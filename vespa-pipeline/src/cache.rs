//! Derived artifact staleness and dedup protocol
//!
//! One decision function shared by every artifact kind (statistics, star
//! images, lightcurve images). State goes in, a decision comes out; the
//! caller persists the returned state change. Nothing here blocks on
//! generation: a caller always leaves with an immediately usable URL.
//!
//! Dedup is advisory, not a lock. Two callers racing before either persists
//! the new handle can both submit; generation is idempotent and convergent,
//! so the duplicate work is wasted but harmless. A job that outlives the
//! liveness window is presumed crashed and becomes eligible for
//! re-submission, trading possible duplicate work for forward progress.

use crate::jobs::{Job, JobSubmitter};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Persistable state of one derived artifact
#[derive(Debug, Clone, Default)]
pub struct ArtifactState {
    /// The rendered blob (or persisted values) exists
    pub blob_exists: bool,
    /// Version recorded when the artifact was generated
    pub version: Option<f64>,
    /// Pending generation job, if one was submitted
    pub job_id: Option<Uuid>,
    /// When that job was submitted
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Outcome of the staleness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactDecision {
    /// Artifact is usable; serve its own URL
    Fresh {
        /// A lingering job handle should be released
        clear_job: bool,
    },
    /// Artifact absent or outdated; serve the fallback
    Stale {
        /// No live job was pending, so a new one must be submitted
        submit: bool,
    },
}

/// Is a pending job still considered live?
///
/// Live means: a handle exists, the submitter has not seen it finish, and it
/// was started inside the liveness window. Anything older is treated as
/// abandoned.
pub fn pending_job_live(
    job_id: Option<Uuid>,
    last_attempt: Option<DateTime<Utc>>,
    liveness_window: Duration,
    now: DateTime<Utc>,
    job_finished: impl Fn(Uuid) -> bool,
) -> bool {
    let Some(job_id) = job_id else {
        return false;
    };
    if job_finished(job_id) {
        return false;
    }
    match last_attempt {
        Some(started) => now.signed_duration_since(started) <= liveness_window,
        // Handle without a timestamp: treat as abandoned rather than
        // pinning the artifact in a never-retried state
        None => false,
    }
}

/// Evaluate the staleness decision table for one artifact.
pub fn assess(
    state: &ArtifactState,
    current_version: f64,
    liveness_window: Duration,
    now: DateTime<Utc>,
    job_finished: impl Fn(Uuid) -> bool,
) -> ArtifactDecision {
    let present = state.blob_exists && state.version == Some(current_version);

    if present {
        ArtifactDecision::Fresh {
            clear_job: state.job_id.is_some(),
        }
    } else {
        let live = pending_job_live(
            state.job_id,
            state.last_attempt,
            liveness_window,
            now,
            job_finished,
        );
        ArtifactDecision::Stale { submit: !live }
    }
}

/// State change the caller must persist after [`get_or_generate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    /// Record this handle and timestamp on the owning row
    pub record_job: Option<(Uuid, DateTime<Utc>)>,
    /// Null out the stored job handle on the owning row
    pub clear_job: bool,
}

impl StateChange {
    pub fn is_noop(&self) -> bool {
        self.record_job.is_none() && !self.clear_job
    }
}

/// Resolution of one artifact request
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// What the consumer should display right now
    pub url: String,
    /// Row updates the caller owes the store
    pub change: StateChange,
}

/// Resolve an artifact request: fresh URL or fallback, submitting a
/// generation job when the artifact is stale and nothing live is pending.
///
/// Never blocks on generation. The returned [`StateChange`] must be
/// persisted by the caller (the decision function does not touch the store).
pub fn get_or_generate(
    state: &ArtifactState,
    current_version: f64,
    liveness_window: Duration,
    now: DateTime<Utc>,
    submitter: &dyn JobSubmitter,
    job: Job,
    own_url: &str,
    fallback_url: &str,
) -> Resolution {
    match assess(state, current_version, liveness_window, now, |id| {
        submitter.is_finished(id)
    }) {
        ArtifactDecision::Fresh { clear_job } => {
            if clear_job {
                if let Some(job_id) = state.job_id {
                    submitter.forget(job_id);
                }
            }
            Resolution {
                url: own_url.to_string(),
                change: StateChange {
                    record_job: None,
                    clear_job,
                },
            }
        }
        ArtifactDecision::Stale { submit } => {
            let record_job = submit.then(|| (submitter.submit(job), now));
            Resolution {
                url: fallback_url.to_string(),
                change: StateChange {
                    record_job,
                    clear_job: false,
                },
            }
        }
    }
}
