//! Worker pool that runs operations outside the request cycle

use anyhow::{Context, Result};
use log::{error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{JobState, StatusUpdate};
use crate::models::OperationKind;

/// Rejection from [`TaskRunner::submit`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("{0} is already running")]
    AlreadyRunning(OperationKind),
}

/// Handle given to a running job for progress reporting
pub struct JobContext {
    kind: OperationKind,
    jobs: Arc<JobState>,
}

impl JobContext {
    /// Context for driving `kind` directly, outside the pool
    pub fn new(kind: OperationKind, jobs: Arc<JobState>) -> Self {
        Self { kind, jobs }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn jobs(&self) -> &JobState {
        &self.jobs
    }

    pub fn update(&self, update: StatusUpdate) {
        self.jobs.update(self.kind, update);
    }
}

/// Fixed-size pool executing one tracked job per operation kind at a time
pub struct TaskRunner {
    pool: rayon::ThreadPool,
    jobs: Arc<JobState>,
}

impl TaskRunner {
    pub fn new(workers: usize, jobs: Arc<JobState>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("sweep-worker-{}", i))
            .build()
            .context("Failed to build worker pool")?;
        Ok(Self { pool, jobs })
    }

    pub fn jobs(&self) -> &Arc<JobState> {
        &self.jobs
    }

    /// Schedule `job` as the run of `kind` and return immediately
    ///
    /// The job's `Ok` value becomes the final status message; an `Err` (or a
    /// panic) is recorded as the status error. Either way the status ends
    /// with `done = true`.
    pub fn submit<F>(&self, kind: OperationKind, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&JobContext) -> Result<String> + Send + 'static,
    {
        if !self.jobs.try_start(kind) {
            info!("Rejected {} start: already running", kind);
            return Err(SubmitError::AlreadyRunning(kind));
        }

        let ctx = JobContext::new(kind, Arc::clone(&self.jobs));

        self.pool.spawn(move || {
            info!("Job {} started", kind);
            match panic::catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
                Ok(Ok(message)) => {
                    info!("Job {} finished: {}", kind, message);
                    ctx.update(StatusUpdate::new().message(message));
                    ctx.jobs.finish(kind, None);
                }
                Ok(Err(e)) => {
                    error!("Job {} failed: {:#}", kind, e);
                    ctx.jobs.finish(kind, Some(format!("{:#}", e)));
                }
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Job {} panicked: {}", kind, reason);
                    ctx.jobs.finish(kind, Some(format!("Internal error: {}", reason)));
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn wait_done(jobs: &JobState, kind: OperationKind) -> crate::models::OperationStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = jobs.get(kind);
            if status.done || Instant::now() > deadline {
                return status;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_submit_runs_job_and_records_message() {
        let jobs = Arc::new(JobState::new());
        let runner = TaskRunner::new(2, Arc::clone(&jobs)).unwrap();

        runner
            .submit(OperationKind::Scan, |ctx| {
                ctx.update(StatusUpdate::new().progress(50));
                Ok("Found 3 senders".to_string())
            })
            .unwrap();

        let status = wait_done(&jobs, OperationKind::Scan);
        assert!(status.done);
        assert_eq!(status.error, None);
        assert_eq!(status.message, "Found 3 senders");
        assert_eq!(status.progress, 100);
    }

    #[test]
    fn test_second_submit_of_same_kind_is_rejected() {
        let jobs = Arc::new(JobState::new());
        let runner = TaskRunner::new(2, Arc::clone(&jobs)).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        runner
            .submit(OperationKind::Scan, move |ctx| {
                ctx.update(StatusUpdate::new().progress(30));
                release_rx.recv().ok();
                Ok("done".to_string())
            })
            .unwrap();

        // Wait until the first job has reported progress
        let deadline = Instant::now() + Duration::from_secs(5);
        while jobs.get(OperationKind::Scan).progress < 30 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let second = runner.submit(OperationKind::Scan, |_| Ok("second".to_string()));
        assert_eq!(second, Err(SubmitError::AlreadyRunning(OperationKind::Scan)));
        assert_eq!(jobs.get(OperationKind::Scan).progress, 30);

        release_tx.send(()).unwrap();
        let status = wait_done(&jobs, OperationKind::Scan);
        assert_eq!(status.message, "done");
    }

    #[test]
    fn test_job_error_is_recorded() {
        let jobs = Arc::new(JobState::new());
        let runner = TaskRunner::new(1, Arc::clone(&jobs)).unwrap();

        runner
            .submit(OperationKind::Delete, |ctx| {
                ctx.update(StatusUpdate::new().progress(34));
                anyhow::bail!("quota exhausted")
            })
            .unwrap();

        let status = wait_done(&jobs, OperationKind::Delete);
        assert!(status.done);
        assert_eq!(status.error.as_deref(), Some("quota exhausted"));
        assert_eq!(status.progress, 34);
    }

    #[test]
    fn test_panicking_job_still_finishes() {
        let jobs = Arc::new(JobState::new());
        let runner = TaskRunner::new(1, Arc::clone(&jobs)).unwrap();

        runner
            .submit(OperationKind::Archive, |_| panic!("boom"))
            .unwrap();

        let status = wait_done(&jobs, OperationKind::Archive);
        assert!(status.done);
        assert!(status.error.unwrap().contains("boom"));
        assert!(!jobs.is_running(OperationKind::Archive));
    }
}
