//! Custom assertion helpers for integration tests.

use std::time::Duration;

use netportal_jobs::prelude::*;

/// Waits until `job` reaches a terminal status.
///
/// # Panics
///
/// Panics if the job is still running after `limit` or disappears.
pub async fn wait_until_done(job: &Job, limit: Duration) -> JobRecord {
    let store = job.store().clone();
    let wait = async {
        loop {
            let notified = store.changed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let record = job.record().expect("job exists");
            if record.done() {
                return record;
            }
            let _ = tokio::time::timeout(Duration::from_millis(50), notified).await;
        }
    };
    tokio::time::timeout(limit, wait)
        .await
        .unwrap_or_else(|_| panic!("job {} not done after {limit:?}", job.id()))
}

/// Asserts that a job completed.
///
/// # Panics
///
/// Panics if the job is not complete.
pub fn assert_job_complete(job: &Job) {
    let record = job.record().expect("job exists");
    assert_eq!(
        record.status,
        JobStatus::Complete,
        "Expected job {} to complete, but status was {:?} ({})",
        record.id,
        record.status,
        record.message
    );
    assert_eq!(record.progress, 100);
}

/// Asserts that a job failed with a message containing `needle`.
///
/// # Panics
///
/// Panics if the job did not fail or the message does not match.
pub fn assert_job_failed(job: &Job, needle: &str) {
    let record = job.record().expect("job exists");
    assert_eq!(
        record.status,
        JobStatus::Error,
        "Expected job {} to fail, but status was {:?}",
        record.id,
        record.status
    );
    assert!(
        record.message.contains(needle),
        "Expected message containing {needle:?}, got {:?}",
        record.message
    );
}

/// Asserts the reference count of a job.
///
/// # Panics
///
/// Panics if the count differs.
pub fn assert_refcount(job: &Job, expected: u32) {
    let record = job.record().expect("job exists");
    assert_eq!(
        record.refcount, expected,
        "Expected job {} to have refcount {expected}, got {}",
        record.id, record.refcount
    );
}
