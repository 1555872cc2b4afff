//! The job store and lifecycle manager.
//!
//! [`JobStore`] owns every job record. It shares work between requests
//! with equal cache handles (the later request becomes a *child* that
//! mirrors its parent), reference-counts jobs while their data is in use,
//! starts workers, and ages out jobs nobody needs any more.
//!
//! All mutations go through one `RwLock`, so an update and its propagation
//! to children are never partially visible. Every update also wakes
//! [`JobStore::changed`] waiters, which the batch runner uses instead of
//! busy polling.

pub mod aging;
pub mod results;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use chrono::Utc;
use netportal_core::JobId;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ExecutionMode, JobStoreConfig};
use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::executor::ExecutorRegistry;
use crate::frame::Frame;
use crate::handle::compute_handle;
use crate::job::{JobRecord, JobSnapshot, JobStatus, JobUpdate};
use crate::metrics::JobMetrics;
use crate::synthetic;
use crate::table::Table;
use crate::value::Value;
use crate::worker::Worker;

pub use aging::{AgeReport, AgeRequest};
pub use results::{FsResultStore, InMemoryResultStore, ResultStore};

/// Message recorded on jobs stopped through [`JobStore::cancel`].
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Applies a parent's update to its children. Children that already
/// finished on their own (for example through [`JobStore::cancel`]) keep
/// their terminal state.
fn mirror_to_children(jobs: &mut HashMap<JobId, JobRecord>, parent: JobId, update: &JobUpdate) {
    for child in jobs
        .values_mut()
        .filter(|r| r.parent == Some(parent) && !r.status.is_terminal())
    {
        update.apply(child);
    }
}

struct Inner {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    results: Arc<dyn ResultStore>,
    executors: ExecutorRegistry,
    config: JobStoreConfig,
    last_sweep: Mutex<Option<Instant>>,
    changed: Notify,
    metrics: JobMetrics,
}

/// Shared handle to the job store.
///
/// Cloning is cheap; clones share the same jobs.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<Inner>,
}

impl JobStore {
    /// Creates a store with default configuration and in-memory results.
    #[must_use]
    pub fn new(executors: ExecutorRegistry) -> Self {
        Self::with_result_store(
            executors,
            JobStoreConfig::default(),
            Arc::new(InMemoryResultStore::new()),
        )
    }

    /// Creates a store from configuration.
    ///
    /// Results go to an [`FsResultStore`] when `config.data_dir` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the data
    /// directory cannot be created.
    pub fn with_config(executors: ExecutorRegistry, config: JobStoreConfig) -> Result<Self> {
        config.validate()?;
        let results: Arc<dyn ResultStore> = match &config.data_dir {
            Some(dir) => Arc::new(FsResultStore::new(dir)?),
            None => Arc::new(InMemoryResultStore::new()),
        };
        Ok(Self::with_result_store(executors, config, results))
    }

    /// Creates a store with an explicit result store.
    #[must_use]
    pub fn with_result_store(
        executors: ExecutorRegistry,
        config: JobStoreConfig,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                results,
                executors,
                config,
                last_sweep: Mutex::new(None),
                changed: Notify::new(),
                metrics: JobMetrics::new(),
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &JobStoreConfig {
        &self.inner.config
    }

    /// Returns the result store.
    #[must_use]
    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.inner.results
    }

    /// Returns the executor registry.
    #[must_use]
    pub fn executors(&self) -> &ExecutorRegistry {
        &self.inner.executors
    }

    /// Notified after every job update.
    ///
    /// Register interest with [`Notify::notified`] before checking job
    /// state to avoid missing a wakeup.
    #[must_use]
    pub fn changed(&self) -> &Notify {
        &self.inner.changed
    }

    pub(crate) fn metrics(&self) -> JobMetrics {
        self.inner.metrics
    }

    /// Returns a handle for job `id`. The job is not checked to exist.
    #[must_use]
    pub fn job(&self, id: JobId) -> Job {
        Job {
            id,
            store: self.clone(),
        }
    }

    /// Returns a copy of a job record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist.
    pub fn get(&self, id: JobId) -> Result<JobRecord> {
        let jobs = self.inner.jobs.read().map_err(poison_err)?;
        jobs.get(&id)
            .cloned()
            .ok_or(Error::JobNotFound { job_id: id })
    }

    /// Returns all jobs ordered by creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn jobs(&self) -> Result<Vec<JobRecord>> {
        let mut records: Vec<JobRecord> = {
            let jobs = self.inner.jobs.read().map_err(poison_err)?;
            jobs.values().cloned().collect()
        };
        records.sort_by_key(|r| (r.created, r.id));
        Ok(records)
    }

    /// Returns the number of jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.jobs.read().map_err(poison_err)?.len())
    }

    /// Returns true if the store holds no jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Creates a job for running `table` with `criteria`.
    ///
    /// Times are reconciled first; criteria without time information are
    /// accepted as-is. When the table is cacheable and a non-child job with
    /// the same handle is `NEW`, `RUNNING` or `COMPLETE`, the new job
    /// becomes a child of the oldest such job, copying its state and adding
    /// a reference to it. Otherwise a new root job starts in `NEW`.
    ///
    /// Every call also kicks off an aging sweep if one is due.
    ///
    /// # Errors
    ///
    /// Returns a resolution error for unparsable time values, a
    /// configuration error when the table's resampling preconditions are
    /// not met, or a storage error.
    pub fn create(&self, table: Arc<Table>, mut criteria: Criteria) -> Result<Job> {
        match criteria.compute_times() {
            Ok(()) => {}
            Err(Error::CannotComputeTimes { message }) => {
                debug!(table = table.name(), %message, "criteria carry no time window");
            }
            Err(e) => return Err(e),
        }
        synthetic::check_resample(&table, &criteria)?;

        let handle = compute_handle(&table, &criteria)?;
        let cacheable = table.is_cacheable() && !criteria.ignore_cache();
        let now = Utc::now();
        let id = JobId::generate();

        let parent_id = {
            let mut jobs = self.inner.jobs.write().map_err(poison_err)?;

            let parent = if cacheable {
                jobs.values()
                    .filter(|r| r.handle == handle && !r.is_child() && r.status.is_reusable())
                    .min_by_key(|r| (r.created, r.id))
                    .map(|r| r.id)
            } else {
                None
            };

            let mut record = JobRecord {
                id,
                created: now,
                touched: now,
                table: Arc::clone(&table),
                criteria,
                actual_criteria: None,
                handle: handle.clone(),
                status: JobStatus::New,
                message: String::new(),
                progress: 0,
                remaining: None,
                refcount: 0,
                parent: None,
                cancel: CancellationToken::new(),
            };

            if let Some(parent) = parent.and_then(|pid| jobs.get_mut(&pid)) {
                parent.refcount = parent.refcount.saturating_add(1);
                parent.touched = now;
                record.parent = Some(parent.id);
                record.status = parent.status;
                record.progress = parent.progress;
                record.remaining = parent.remaining;
                record.actual_criteria.clone_from(&parent.actual_criteria);
            }

            let parent_id = record.parent;
            jobs.insert(id, record);
            parent_id
        };

        self.inner.metrics.record_created(parent_id.is_some());
        match parent_id {
            Some(parent) => info!(job_id = %id, %parent, %handle, table = table.name(), "created child job"),
            None => info!(job_id = %id, %handle, table = table.name(), "created job"),
        }

        self.age_in_background();
        Ok(self.job(id))
    }

    /// Starts a job.
    ///
    /// Child jobs and jobs that already left `NEW` are left alone. Otherwise
    /// the job moves to `RUNNING`, the worker takes a reference, and the
    /// table's executor runs either on a new tokio task or, in
    /// [`ExecutionMode::Inline`], before this call returns.
    ///
    /// Spawned execution must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no executor is registered for the
    /// table, or [`Error::JobNotFound`].
    pub async fn start(&self, id: JobId) -> Result<()> {
        let record = self.get(id)?;
        if record.is_child() {
            debug!(job_id = %id, parent = ?record.parent, "child job shadows its parent");
            return Ok(());
        }
        let executor = self
            .inner
            .executors
            .get(record.table.executor())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "no query executor registered as '{}' for table '{}'",
                    record.table.executor(),
                    record.table.name()
                ))
            })?;

        if !self.claim(id)? {
            debug!(job_id = %id, "job already started");
            return Ok(());
        }

        let worker = Worker::new(self.job(id), executor);
        match self.inner.config.execution {
            ExecutionMode::Spawned => {
                tokio::spawn(worker.run());
            }
            ExecutionMode::Inline => worker.run().await,
        }
        Ok(())
    }

    /// Moves a `NEW` root job to `RUNNING` and takes the worker's reference.
    fn claim(&self, id: JobId) -> Result<bool> {
        {
            let mut jobs = self.inner.jobs.write().map_err(poison_err)?;
            let record = jobs.get_mut(&id).ok_or(Error::JobNotFound { job_id: id })?;
            if record.status != JobStatus::New || record.is_child() {
                return Ok(false);
            }
            let update = JobUpdate::progress(0, None);
            update.apply(record);
            record.refcount = record.refcount.saturating_add(1);
            mirror_to_children(&mut jobs, id, &update);
        }
        self.inner.metrics.record_transition(JobStatus::Running.as_label());
        self.inner.changed.notify_waiters();
        Ok(true)
    }

    /// Applies a partial update and mirrors it to the job's children.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the status change is not
    /// allowed, or [`Error::JobNotFound`].
    pub fn update(&self, id: JobId, update: JobUpdate) -> Result<()> {
        let transition = {
            let mut jobs = self.inner.jobs.write().map_err(poison_err)?;
            let record = jobs.get_mut(&id).ok_or(Error::JobNotFound { job_id: id })?;
            let from = record.status;
            if let Some(to) = update.status {
                if !from.can_transition_to(to) {
                    let reason = if from.is_terminal() {
                        "terminal states are final"
                    } else {
                        "a job must be running before it completes"
                    };
                    return Err(Error::InvalidStateTransition {
                        from: from.to_string(),
                        to: to.to_string(),
                        reason: reason.into(),
                    });
                }
            }
            update.apply(record);
            let to = record.status;
            let is_root = !record.is_child();

            if is_root {
                mirror_to_children(&mut jobs, id, &update);
            }
            (from != to).then_some(to)
        };

        if let Some(to) = transition {
            self.inner.metrics.record_transition(to.as_label());
            debug!(job_id = %id, status = %to, "job status changed");
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }

    /// Adds a reference to a job; returns the new count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist.
    pub fn reference(&self, id: JobId) -> Result<u32> {
        let mut jobs = self.inner.jobs.write().map_err(poison_err)?;
        let record = jobs.get_mut(&id).ok_or(Error::JobNotFound { job_id: id })?;
        record.refcount = record.refcount.saturating_add(1);
        Ok(record.refcount)
    }

    /// Drops a reference to a job; returns the new count.
    ///
    /// Dropping a reference that was never taken is logged and ignored so
    /// the count never goes below zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist.
    pub fn dereference(&self, id: JobId) -> Result<u32> {
        let mut jobs = self.inner.jobs.write().map_err(poison_err)?;
        let record = jobs.get_mut(&id).ok_or(Error::JobNotFound { job_id: id })?;
        if record.refcount == 0 {
            warn!(job_id = %id, "dereference of job with no references");
        } else {
            record.refcount -= 1;
        }
        Ok(record.refcount)
    }

    /// Returns true once the job is `COMPLETE` or `ERROR`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist.
    pub fn done(&self, id: JobId) -> Result<bool> {
        let jobs = self.inner.jobs.read().map_err(poison_err)?;
        jobs.get(&id)
            .map(JobRecord::done)
            .ok_or(Error::JobNotFound { job_id: id })
    }

    /// Marks a job `ERROR` at 100% with `message`.
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn mark_error(&self, id: JobId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        warn!(job_id = %id, %message, "job failed");
        self.update(id, JobUpdate::error(message))
    }

    /// Marks a job `COMPLETE` at 100%.
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn mark_complete(&self, id: JobId) -> Result<()> {
        self.update(id, JobUpdate::complete())
    }

    /// Marks a job `RUNNING` with `progress` and an optional estimate.
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn mark_progress(&self, id: JobId, progress: i32, remaining: Option<u64>) -> Result<()> {
        self.update(id, JobUpdate::progress(progress, remaining))
    }

    /// Cancels a job that has not finished.
    ///
    /// A root job's cancellation token fires, so its executor can stop; the
    /// job and its children become `ERROR` with message `"cancelled"`.
    /// Cancelling a child only fails the child. Returns false if the job
    /// had already finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let record = self.get(id)?;
        if record.done() {
            return Ok(false);
        }
        if !record.is_child() {
            record.cancel.cancel();
        }
        match self.update(id, JobUpdate::error(CANCELLED_MESSAGE)) {
            Ok(()) => {
                info!(job_id = %id, "job cancelled");
                Ok(true)
            }
            Err(Error::InvalidStateTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns the token that fires when the job is cancelled or deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job does not exist.
    pub fn cancellation(&self, id: JobId) -> Result<CancellationToken> {
        let jobs = self.inner.jobs.read().map_err(poison_err)?;
        jobs.get(&id)
            .map(|r| r.cancel.clone())
            .ok_or(Error::JobNotFound { job_id: id })
    }

    /// Loads the result of a complete job, holding a reference while
    /// reading. Returns `None` if the query produced no data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotComplete`] unless the job is `COMPLETE`.
    pub fn data(&self, id: JobId) -> Result<Option<Arc<Frame>>> {
        let record = self.get(id)?;
        if record.status != JobStatus::Complete {
            return Err(Error::JobNotComplete {
                job_id: id,
                status: record.status.to_string(),
            });
        }
        self.reference(id)?;
        let loaded = self.inner.results.load(&record.handle);
        if let Err(e) = self.dereference(id) {
            warn!(job_id = %id, error = %e, "failed to release data reference");
        }
        loaded
    }

    /// Returns result rows in the table's column order; missing values and
    /// columns are `Null`. A job without data yields no rows.
    ///
    /// # Errors
    ///
    /// See [`JobStore::data`].
    pub fn values(&self, id: JobId) -> Result<Vec<Vec<Value>>> {
        let table = self.get(id)?.table;
        Ok(self
            .data(id)?
            .map(|frame| frame.rows_for(&table.column_names()))
            .unwrap_or_default())
    }

    /// Returns the flat poll structure; `data` is filled in once complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] or a storage error.
    pub fn snapshot(&self, id: JobId) -> Result<JobSnapshot> {
        let record = self.get(id)?;
        let data = if record.status == JobStatus::Complete {
            Some(self.values(id)?)
        } else {
            None
        };
        Ok(JobSnapshot {
            id,
            handle: record.handle,
            status: record.status,
            progress: record.progress,
            remaining: record.remaining,
            message: record.message,
            data,
        })
    }

    /// Runs a due aging sweep off the caller's thread when workers are
    /// spawned on a tokio runtime, since deleting results may touch disk.
    /// Inline stores, and callers outside a runtime, sweep synchronously.
    fn age_in_background(&self) {
        if !self.sweep_due() {
            return;
        }
        let store = self.clone();
        match (self.inner.config.execution, tokio::runtime::Handle::try_current()) {
            (ExecutionMode::Spawned, Ok(runtime)) => {
                runtime.spawn_blocking(move || store.sweep_and_log());
            }
            _ => store.sweep_and_log(),
        }
    }

    fn sweep_and_log(&self) {
        match self.age_jobs(AgeRequest::default()) {
            Ok(report) if report.deleted() > 0 => {
                info!(ancient = report.ancient, old = report.old, "aged out jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "job aging sweep failed"),
        }
    }
}

impl fmt::Debug for JobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStore")
            .field("config", &self.inner.config)
            .field("executors", &self.inner.executors)
            .field("results", &self.inner.results)
            .finish_non_exhaustive()
    }
}

/// A handle to one job in a [`JobStore`].
///
/// Every method reads or changes the live record in the store.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    store: JobStore,
}

impl Job {
    /// Returns the job ID.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Returns the owning store.
    #[must_use]
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Returns a copy of the record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn record(&self) -> Result<JobRecord> {
        self.store.get(self.id)
    }

    /// Returns the job's table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn table(&self) -> Result<Arc<Table>> {
        Ok(self.record()?.table)
    }

    /// Returns the criteria the job was created with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn criteria(&self) -> Result<Criteria> {
        Ok(self.record()?.criteria)
    }

    /// Returns the cache handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn handle(&self) -> Result<String> {
        Ok(self.record()?.handle)
    }

    /// Returns the status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn status(&self) -> Result<JobStatus> {
        Ok(self.record()?.status)
    }

    /// Returns the progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn progress(&self) -> Result<i32> {
        Ok(self.record()?.progress)
    }

    /// Returns the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn message(&self) -> Result<String> {
        Ok(self.record()?.message)
    }

    /// See [`JobStore::done`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn done(&self) -> Result<bool> {
        self.store.done(self.id)
    }

    /// See [`JobStore::start`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::start`].
    pub async fn start(&self) -> Result<()> {
        self.store.start(self.id).await
    }

    /// See [`JobStore::mark_progress`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn mark_progress(&self, progress: i32, remaining: Option<u64>) -> Result<()> {
        self.store.mark_progress(self.id, progress, remaining)
    }

    /// See [`JobStore::mark_error`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn mark_error(&self, message: impl Into<String>) -> Result<()> {
        self.store.mark_error(self.id, message)
    }

    /// See [`JobStore::mark_complete`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn mark_complete(&self) -> Result<()> {
        self.store.mark_complete(self.id)
    }

    /// Records criteria as adjusted by the executor, e.g. snapped times.
    ///
    /// # Errors
    ///
    /// See [`JobStore::update`].
    pub fn set_actual_criteria(&self, criteria: Criteria) -> Result<()> {
        self.store
            .update(self.id, JobUpdate::default().with_actual_criteria(criteria))
    }

    /// See [`JobStore::reference`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn reference(&self) -> Result<u32> {
        self.store.reference(self.id)
    }

    /// See [`JobStore::dereference`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn dereference(&self) -> Result<u32> {
        self.store.dereference(self.id)
    }

    /// See [`JobStore::cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn cancel(&self) -> Result<bool> {
        self.store.cancel(self.id)
    }

    /// See [`JobStore::cancellation`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job was deleted.
    pub fn cancellation(&self) -> Result<CancellationToken> {
        self.store.cancellation(self.id)
    }

    /// See [`JobStore::data`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::data`].
    pub fn data(&self) -> Result<Option<Arc<Frame>>> {
        self.store.data(self.id)
    }

    /// See [`JobStore::values`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::data`].
    pub fn values(&self) -> Result<Vec<Vec<Value>>> {
        self.store.values(self.id)
    }

    /// See [`JobStore::snapshot`].
    ///
    /// # Errors
    ///
    /// See [`JobStore::snapshot`].
    pub fn snapshot(&self) -> Result<JobSnapshot> {
        self.store.snapshot(self.id)
    }

    /// See [`JobStore::delete`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock is poisoned.
    pub fn delete(&self) -> Result<bool> {
        self.store.delete(self.id)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}
