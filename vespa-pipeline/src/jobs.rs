//! Job submission facility
//!
//! The pipeline never runs generation work inline with a caller; it submits
//! jobs through the [`JobSubmitter`] capability and polls handles without
//! blocking. The production implementation is an in-process tokio runner;
//! tests inject recording fakes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// A unit of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Download raw photometry from the archive
    FetchRawData { star_id: i64 },
    /// Derive min/mean/max magnitude for a star
    ComputeStatistics { star_id: i64 },
    /// Render the whole-lightcurve scatter for a star
    RenderStarImage { star_id: i64 },
    /// Render the folded scatter and thumbnail for one lightcurve
    RenderLightcurveImages { lightcurve_id: i64 },
}

/// Submit work, poll for completion, best-effort forget.
///
/// Handles are opaque UUIDs so they can be persisted alongside the owning
/// row (the dedup protocol stores handle + start timestamp per artifact).
/// An unknown handle reports finished: after a restart the runner's registry
/// is empty, and "finished" lets the liveness-window logic re-trigger the
/// orphaned work.
pub trait JobSubmitter: Send + Sync {
    fn submit(&self, job: Job) -> Uuid;
    fn is_finished(&self, handle: Uuid) -> bool;
    fn forget(&self, handle: Uuid);
}

/// Executes the body of a job; implemented by the pipeline over its context
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: Job) -> anyhow::Result<()>;
}

/// In-process tokio job runner
///
/// Jobs run on the shared runtime's worker pool with no ordering guarantee
/// between owners. Failures are logged and otherwise dropped; the next sweep
/// cycle is the retry mechanism.
pub struct TokioJobRunner {
    executor: Arc<dyn JobExecutor>,
    registry: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TokioJobRunner {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            executor,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Drop registry entries whose tasks have completed.
    ///
    /// Called on every submit so the registry stays bounded by the number of
    /// in-flight jobs rather than the number ever submitted.
    fn reap(registry: &mut HashMap<Uuid, JoinHandle<()>>) {
        registry.retain(|_, handle| !handle.is_finished());
    }
}

impl JobSubmitter for TokioJobRunner {
    fn submit(&self, job: Job) -> Uuid {
        let handle_id = Uuid::new_v4();
        let executor = Arc::clone(&self.executor);
        debug!(?job, %handle_id, "Submitting background job");
        let task = tokio::spawn(async move {
            if let Err(e) = executor.execute(job).await {
                error!(?job, "Background job failed: {:#}", e);
            }
        });

        let mut registry = self.registry.lock().expect("job registry poisoned");
        Self::reap(&mut registry);
        registry.insert(handle_id, task);
        handle_id
    }

    fn is_finished(&self, handle: Uuid) -> bool {
        let registry = self.registry.lock().expect("job registry poisoned");
        registry.get(&handle).map_or(true, |task| task.is_finished())
    }

    fn forget(&self, handle: Uuid) {
        let mut registry = self.registry.lock().expect("job registry poisoned");
        // Forget is advisory: the task keeps running, its eventual writes
        // are still valid (last write wins).
        registry.remove(&handle);
    }
}

pub mod testing {
    //! Recording fake for dedup and staleness tests

    use super::*;

    /// Records submitted jobs; finished/live state is driven by the test.
    #[derive(Default)]
    pub struct RecordingSubmitter {
        pub submitted: Mutex<Vec<(Uuid, Job)>>,
        pub finished: Mutex<Vec<Uuid>>,
        pub forgotten: Mutex<Vec<Uuid>>,
        known: Mutex<Vec<Uuid>>,
    }

    impl RecordingSubmitter {
        pub fn submitted_jobs(&self) -> Vec<Job> {
            self.submitted.lock().unwrap().iter().map(|(_, j)| *j).collect()
        }

        pub fn mark_finished(&self, handle: Uuid) {
            self.finished.lock().unwrap().push(handle);
        }

        /// A handle that reports live without recording a submission, for
        /// seeding pre-existing pending-job state.
        pub fn issue_live_handle(&self) -> Uuid {
            let handle = Uuid::new_v4();
            self.known.lock().unwrap().push(handle);
            handle
        }
    }

    impl JobSubmitter for RecordingSubmitter {
        fn submit(&self, job: Job) -> Uuid {
            let handle = Uuid::new_v4();
            self.known.lock().unwrap().push(handle);
            self.submitted.lock().unwrap().push((handle, job));
            handle
        }

        fn is_finished(&self, handle: Uuid) -> bool {
            // Unknown handles report finished, like the production runner
            // after a restart
            let known = self.known.lock().unwrap().contains(&handle);
            !known || self.finished.lock().unwrap().contains(&handle)
        }

        fn forget(&self, handle: Uuid) {
            self.forgotten.lock().unwrap().push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _job: Job) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runner_executes_submitted_jobs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = TokioJobRunner::new(Arc::new(CountingExecutor { runs: runs.clone() }));

        let handle = runner.submit(Job::ComputeStatistics { star_id: 1 });
        // Poll until the spawned task completes
        for _ in 0..100 {
            if runner.is_finished(handle) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(runner.is_finished(handle));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_handle_reports_finished() {
        let runner = TokioJobRunner::new(Arc::new(CountingExecutor {
            runs: Arc::new(AtomicUsize::new(0)),
        }));
        assert!(runner.is_finished(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn forgotten_handle_reports_finished() {
        let runner = TokioJobRunner::new(Arc::new(CountingExecutor {
            runs: Arc::new(AtomicUsize::new(0)),
        }));
        let handle = runner.submit(Job::FetchRawData { star_id: 7 });
        runner.forget(handle);
        assert!(runner.is_finished(handle));
    }
}
