//! Job aging, flushing and deletion.
//!
//! A sweep first deletes *ancient* jobs whatever their reference count,
//! then deletes *old* jobs nobody references. Ages are measured from the
//! job's `touched` time. Unforced sweeps run at most once per
//! `age_interval` and never wait for a sweep already in progress.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use netportal_core::JobId;
use tracing::{debug, info, warn};

use super::{poison_err, JobStore};
use crate::error::Result;
use crate::job::JobRecord;

/// Parameters of an aging sweep. `None` thresholds use the store config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeRequest {
    /// Unreferenced jobs at least this old are deleted.
    pub old: Option<Duration>,
    /// Jobs at least this old are deleted even if referenced.
    pub ancient: Option<Duration>,
    /// Ignore the sweep interval and wait for a concurrent sweep.
    pub force: bool,
}

impl AgeRequest {
    /// A forced sweep with the configured thresholds.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeReport {
    /// True if the sweep was throttled and nothing was examined.
    pub skipped: bool,
    /// Jobs deleted as ancient, children included.
    pub ancient: usize,
    /// Jobs deleted as old, children included.
    pub old: usize,
}

impl AgeReport {
    /// Total jobs deleted.
    #[must_use]
    pub fn deleted(&self) -> usize {
        self.ancient + self.old
    }
}

fn age_of(record: &JobRecord, now: chrono::DateTime<Utc>) -> Duration {
    (now - record.touched).to_std().unwrap_or_default()
}

impl JobStore {
    /// Runs an aging sweep.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a lock is poisoned.
    pub fn age_jobs(&self, request: AgeRequest) -> Result<AgeReport> {
        let interval = self.inner.config.age_interval;
        let mut last = if request.force {
            self.inner.last_sweep.lock().map_err(poison_err)?
        } else {
            match self.inner.last_sweep.try_lock() {
                Ok(guard) => guard,
                Err(std::sync::TryLockError::WouldBlock) => {
                    return Ok(AgeReport {
                        skipped: true,
                        ..AgeReport::default()
                    });
                }
                Err(std::sync::TryLockError::Poisoned(e)) => return Err(poison_err(e)),
            }
        };
        if !request.force && last.is_some_and(|at| at.elapsed() < interval) {
            return Ok(AgeReport {
                skipped: true,
                ..AgeReport::default()
            });
        }
        *last = Some(Instant::now());

        let ancient_after = request.ancient.unwrap_or(self.inner.config.age_ancient);
        let old_after = request.old.unwrap_or(self.inner.config.age_old);

        let now = Utc::now();
        let ancient = self.select(|r| age_of(r, now) >= ancient_after)?;
        let ancient = self.release(&ancient, "ancient")?;

        let now = Utc::now();
        let old = self.select(|r| r.refcount == 0 && age_of(r, now) >= old_after)?;
        let old = self.release(&old, "old")?;

        debug!(ancient, old, "aging sweep finished");
        Ok(AgeReport {
            skipped: false,
            ancient,
            old,
        })
    }

    /// Returns true when an unforced sweep would run now. A sweep already
    /// in progress counts as not due.
    pub(super) fn sweep_due(&self) -> bool {
        match self.inner.last_sweep.try_lock() {
            Ok(last) => last.map_or(true, |at| at.elapsed() >= self.inner.config.age_interval),
            Err(_) => false,
        }
    }

    /// Deletes every job that has not reached 100% progress. Returns the
    /// number of jobs deleted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a lock is poisoned.
    pub fn flush_incomplete(&self) -> Result<usize> {
        let ids = self.select(|r| r.progress < 100)?;
        let count = self.release(&ids, "flushed")?;
        info!(count, "flushed incomplete jobs");
        Ok(count)
    }

    /// Deletes a job. A root's children go with it. Returns false if the
    /// job did not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a lock is poisoned.
    pub fn delete(&self, id: JobId) -> Result<bool> {
        Ok(self.release(&[id], "deleted")? > 0)
    }

    fn select(&self, predicate: impl Fn(&JobRecord) -> bool) -> Result<Vec<JobId>> {
        let jobs = self.inner.jobs.read().map_err(poison_err)?;
        Ok(jobs
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.id)
            .collect())
    }

    /// Removes `ids` and their children, releases the references they held
    /// on parents, and drops results no remaining job shares.
    fn release(&self, ids: &[JobId], reason: &'static str) -> Result<usize> {
        let (removed, orphaned) = {
            let mut jobs = self.inner.jobs.write().map_err(poison_err)?;

            let roots: HashSet<JobId> = ids.iter().copied().collect();
            let doomed: Vec<JobId> = jobs
                .values()
                .filter(|r| {
                    roots.contains(&r.id) || r.parent.is_some_and(|p| roots.contains(&p))
                })
                .map(|r| r.id)
                .collect();

            let mut removed = Vec::with_capacity(doomed.len());
            for id in &doomed {
                if let Some(record) = jobs.remove(id) {
                    record.cancel.cancel();
                    removed.push(record);
                }
            }

            for record in &removed {
                let Some(parent) = record.parent.and_then(|p| jobs.get_mut(&p)) else {
                    continue;
                };
                if parent.refcount == 0 {
                    warn!(job_id = %parent.id, child = %record.id, "parent had no reference to release");
                } else {
                    parent.refcount -= 1;
                }
            }

            let live: HashSet<&str> = jobs.values().map(|r| r.handle.as_str()).collect();
            let orphaned: HashSet<String> = removed
                .iter()
                .filter(|r| !live.contains(r.handle.as_str()))
                .map(|r| r.handle.clone())
                .collect();
            (removed, orphaned)
        };

        for handle in &orphaned {
            if let Err(e) = self.inner.results.delete(handle) {
                warn!(%handle, error = %e, "failed to delete job result");
            }
        }
        for record in &removed {
            debug!(job_id = %record.id, reason, "deleted job");
        }
        if !removed.is_empty() {
            self.inner.changed.notify_waiters();
        }
        self.inner.metrics.record_aged(reason, removed.len());
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use netportal_core::TableId;

    use super::*;
    use crate::config::JobStoreConfig;
    use crate::criteria::Criteria;
    use crate::executor::{EmptyExecutor, ExecutorRegistry};
    use crate::frame::Frame;
    use crate::store::{InMemoryResultStore, ResultStore};
    use crate::table::{Column, Table};

    fn store_with(results: Arc<InMemoryResultStore>) -> JobStore {
        JobStore::with_result_store(
            ExecutorRegistry::new().with("empty", EmptyExecutor),
            JobStoreConfig::default().inline(),
            results,
        )
    }

    fn table() -> Arc<Table> {
        Arc::new(Table::new(TableId::new(1), "t", "empty").column(Column::new("bytes")))
    }

    fn backdate(store: &JobStore, id: JobId, by: chrono::Duration) {
        let mut jobs = store.inner.jobs.write().unwrap();
        let record = jobs.get_mut(&id).unwrap();
        record.touched -= by;
    }

    #[test]
    fn old_sweep_spares_referenced_jobs() {
        let store = store_with(Arc::new(InMemoryResultStore::new()));
        let held = store.create(table(), Criteria::new().with("h", "a")).unwrap();
        let idle = store.create(table(), Criteria::new().with("h", "b")).unwrap();
        held.reference().unwrap();
        backdate(&store, held.id(), chrono::Duration::days(2));
        backdate(&store, idle.id(), chrono::Duration::days(2));

        let report = store.age_jobs(AgeRequest::forced()).unwrap();
        assert_eq!(report.old, 1);
        assert_eq!(report.ancient, 0);
        assert!(held.record().is_ok());
        assert!(idle.record().is_err());
    }

    #[test]
    fn ancient_sweep_ignores_references() {
        let store = store_with(Arc::new(InMemoryResultStore::new()));
        let held = store.create(table(), Criteria::new()).unwrap();
        held.reference().unwrap();
        backdate(&store, held.id(), chrono::Duration::days(8));

        let report = store.age_jobs(AgeRequest::forced()).unwrap();
        assert_eq!(report.ancient, 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn unforced_sweeps_are_throttled() {
        let store = store_with(Arc::new(InMemoryResultStore::new()));
        store.age_jobs(AgeRequest::forced()).unwrap();
        let report = store.age_jobs(AgeRequest::default()).unwrap();
        assert!(report.skipped);
        assert!(!store.sweep_due());

        *store.inner.last_sweep.lock().unwrap() = None;
        assert!(store.sweep_due());
    }

    #[test]
    fn deleting_parent_cascades_and_keeps_shared_results() {
        let results = Arc::new(InMemoryResultStore::new());
        let store = store_with(Arc::clone(&results));
        let criteria = Criteria::new().with("h", "a");
        let root = store.create(table(), criteria.clone()).unwrap();
        let child = store.create(table(), criteria).unwrap();
        let handle = root.handle().unwrap();
        results.store(&handle, Frame::default()).unwrap();

        assert!(child.delete().unwrap());
        assert_eq!(root.record().unwrap().refcount, 0);
        assert!(results.load(&handle).unwrap().is_some());

        let child = store.create(table(), Criteria::new().with("h", "a")).unwrap();
        assert!(root.delete().unwrap());
        assert!(child.record().is_err());
        assert!(results.load(&handle).unwrap().is_none());
        assert!(!root.delete().unwrap());
    }

    #[test]
    fn flush_drops_unfinished_jobs() {
        let store = store_with(Arc::new(InMemoryResultStore::new()));
        let pending = store.create(table(), Criteria::new().with("h", "a")).unwrap();
        let failed = store.create(table(), Criteria::new().with("h", "b")).unwrap();
        failed.mark_error("boom").unwrap();

        assert_eq!(store.flush_incomplete().unwrap(), 1);
        assert!(pending.record().is_err());
        assert!(failed.record().is_ok());
    }
}
