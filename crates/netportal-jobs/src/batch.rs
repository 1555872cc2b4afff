//! Drives a set of dependent jobs on behalf of a base job.
//!
//! At most `batch_size` dependents run at once. As soon as one finishes
//! the next pending job starts in its place, and the base job's progress
//! is updated with the aggregate progress of the whole set, mapped into a
//! configurable sub-range.
//!
//! The runner does not busy-poll: it waits on the job store's change
//! notification, with `poll_interval` as an upper bound.

use std::collections::VecDeque;
use std::time::Duration;

use netportal_core::observability::batch_span;
use netportal_core::JobId;
use tokio::time::timeout;
use tracing::{debug, warn, Instrument};

use crate::error::{Error, Result};
use crate::job::JobStatus;
use crate::store::Job;

/// How a batch ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of dependent jobs.
    pub total: usize,
    /// Dependents that completed.
    pub completed: Vec<JobId>,
    /// Dependents that failed, could not start, or disappeared.
    pub failed: Vec<JobId>,
    /// True if the base job reached a terminal state before the batch
    /// finished; the remaining dependents were left alone.
    pub abandoned: bool,
}

impl BatchReport {
    /// Returns true if every dependent completed.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        !self.abandoned && self.completed.len() == self.total
    }
}

/// Runs dependent jobs in a sliding window.
#[derive(Debug)]
pub struct BatchRunner {
    base: Job,
    jobs: Vec<Job>,
    batch_size: usize,
    min_progress: i32,
    max_progress: i32,
    poll_interval: Duration,
}

impl BatchRunner {
    /// Creates a runner reporting progress to `base`, using the store's
    /// default batch size and poll interval and the full 0..=100 range.
    #[must_use]
    pub fn new(base: Job) -> Self {
        let config = base.store().config();
        let batch_size = config.default_batch_size.max(1);
        let poll_interval = config.batch_poll_interval;
        Self {
            base,
            jobs: Vec::new(),
            batch_size,
            min_progress: 0,
            max_progress: 100,
            poll_interval,
        }
    }

    /// Sets the maximum number of dependents running at once.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Maps aggregate progress into `min..=max` on the base job.
    #[must_use]
    pub fn progress_range(mut self, min: i32, max: i32) -> Self {
        self.min_progress = min.clamp(0, 100);
        self.max_progress = max.clamp(self.min_progress, 100);
        self
    }

    /// Sets the longest wait between progress checks.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Adds a dependent job.
    #[must_use]
    pub fn add_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Adds dependent jobs.
    #[must_use]
    pub fn jobs(mut self, jobs: impl IntoIterator<Item = Job>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    /// Runs every dependent to a terminal state.
    ///
    /// Failed dependents are reported, not returned as errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the base job was deleted or a lock is poisoned.
    pub async fn run(self) -> Result<BatchReport> {
        let span = batch_span(
            &self.base.id().to_string(),
            self.jobs.len(),
            self.batch_size,
        );
        self.drive().instrument(span).await
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn scale(&self, finished: usize, inflight: i64, total: usize) -> i32 {
        let total = total.max(1) as i64;
        let aggregate = ((finished as i64) * 100 + inflight) / total;
        let span = i64::from(self.max_progress - self.min_progress);
        self.min_progress + (span * aggregate.clamp(0, 100) / 100) as i32
    }

    async fn drive(self) -> Result<BatchReport> {
        let store = self.base.store().clone();
        let metrics = store.metrics();
        let total = self.jobs.len();
        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };
        let mut pending: VecDeque<Job> = self.jobs.iter().cloned().collect();
        let mut window: Vec<Job> = Vec::with_capacity(self.batch_size);
        let mut last_reported = None;

        loop {
            while window.len() < self.batch_size {
                let Some(job) = pending.pop_front() else {
                    break;
                };
                if let Err(e) = job.start().await {
                    warn!(job_id = %job.id(), error = %e, "dependent job failed to start");
                    if let Err(mark) = job.mark_error(e.to_string()) {
                        debug!(job_id = %job.id(), error = %mark, "could not record start failure");
                    }
                }
                metrics.add_batch_inflight(1);
                window.push(job);
            }
            if window.is_empty() {
                break;
            }

            let notified = store.changed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut finished_now = false;
            let mut inflight: i64 = 0;
            let mut i = 0;
            while i < window.len() {
                let status = match window[i].record() {
                    Ok(record) if !record.done() => {
                        inflight += i64::from(record.progress.clamp(0, 99));
                        i += 1;
                        continue;
                    }
                    Ok(record) => Some(record.status),
                    Err(Error::JobNotFound { .. }) => None,
                    Err(e) => return Err(e),
                };
                let job = window.remove(i);
                metrics.add_batch_inflight(-1);
                finished_now = true;
                if status == Some(JobStatus::Complete) {
                    report.completed.push(job.id());
                } else {
                    report.failed.push(job.id());
                }
                debug!(job_id = %job.id(), ?status, "dependent job finished");
            }

            let finished = report.completed.len() + report.failed.len();
            let progress = self.scale(finished, inflight, total);
            if last_reported != Some(progress) {
                if self.base.done()? {
                    debug!("base job finished early, abandoning batch");
                    metrics.add_batch_inflight(-i64::try_from(window.len()).unwrap_or(0));
                    report.abandoned = true;
                    return Ok(report);
                }
                self.base.mark_progress(progress, None)?;
                last_reported = Some(progress);
            }

            if !finished_now && !window.is_empty() {
                let _ = timeout(self.poll_interval, notified).await;
            }
        }

        if last_reported != Some(self.max_progress) && !self.base.done()? {
            self.base.mark_progress(self.max_progress, None)?;
        }
        debug!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        Ok(report)
    }
}
