//! Batch scheduling of dependent jobs with spawned workers.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netportal_jobs::prelude::*;
use netportal_test_utils::{
    assert_job_complete, init_test_logging, simple_table, StoreFactory, TrackingExecutor, EMPTY,
    FAILING, TRACKING,
};

fn dependents(store: &JobStore, first_id: u64, count: u64, executor: &str) -> Vec<Job> {
    (first_id..first_id + count)
        .map(|id| store.create(simple_table(id, executor), Criteria::new()).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sliding_window_limits_concurrency() {
    init_test_logging();
    let tracking = TrackingExecutor::new(Duration::from_millis(40));
    let store = StoreFactory::new().tracking(tracking.clone()).build();
    let base = store.create(simple_table(1, EMPTY), Criteria::new()).unwrap();
    let deps = dependents(&store, 100, 5, TRACKING);

    // sample the base's progress on every store change
    let samples = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let store = store.clone();
        let base = base.clone();
        let deps = deps.clone();
        let samples = Arc::clone(&samples);
        tokio::spawn(async move {
            loop {
                let notified = store.changed().notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let progress = base.progress().unwrap();
                let all_done = deps.iter().all(|d| d.done().unwrap());
                samples.lock().unwrap().push((progress, all_done));
                if progress == 100 {
                    return;
                }
                let _ = tokio::time::timeout(Duration::from_millis(10), notified).await;
            }
        })
    };

    let report = BatchRunner::new(base.clone())
        .batch_size(2)
        .jobs(deps.clone())
        .run()
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();

    assert!(report.all_complete());
    assert_eq!(report.completed.len(), 5);
    assert_eq!(tracking.max_concurrency(), 2);
    assert_eq!(tracking.finished().len(), 5);
    for dep in &deps {
        assert_job_complete(dep);
    }
    assert_eq!(base.progress().unwrap(), 100);

    let samples = samples.lock().unwrap();
    assert!(samples
        .iter()
        .filter(|(progress, _)| *progress == 100)
        .all(|(_, all_done)| *all_done));
    assert!(samples.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test]
async fn failures_do_not_stop_the_batch() {
    let store = StoreFactory::new().inline().build();
    let base = store.create(simple_table(1, EMPTY), Criteria::new()).unwrap();
    let failing = dependents(&store, 100, 2, FAILING);
    let passing = dependents(&store, 200, 3, EMPTY);

    let report = BatchRunner::new(base.clone())
        .batch_size(2)
        .progress_range(0, 70)
        .jobs(failing.iter().chain(&passing).cloned())
        .run()
        .await
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.failed, failing.iter().map(Job::id).collect::<Vec<_>>());
    assert_eq!(report.completed, passing.iter().map(Job::id).collect::<Vec<_>>());
    assert_eq!(base.progress().unwrap(), 70);
    assert_eq!(base.status().unwrap(), JobStatus::Running);
}

#[tokio::test]
async fn deleted_dependents_count_as_failed() {
    let store = StoreFactory::new().build();
    let base = store.create(simple_table(1, EMPTY), Criteria::new()).unwrap();
    let deps = dependents(&store, 100, 2, TRACKING);
    assert!(deps[0].delete().unwrap());

    let report = BatchRunner::new(base)
        .jobs(deps.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(report.failed, vec![deps[0].id()]);
    assert_eq!(report.completed, vec![deps[1].id()]);
}
