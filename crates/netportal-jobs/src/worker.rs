//! Runs one job's query executor to completion.
//!
//! The worker owns the reference taken when the job store claimed the job
//! and releases it exactly once, whatever the executor does: return data,
//! report a failure, return an error, panic, or get cancelled.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use netportal_core::observability::job_span;
use tracing::{debug, error, info, Instrument};

use crate::coerce;
use crate::error::{Error, Result};
use crate::executor::{QueryData, QueryExecutor, QueryOutcome};
use crate::job::{JobStatus, JobUpdate};
use crate::store::Job;
use crate::synthetic;

/// Message recorded when an executor fails without saying why.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Query returned an unknown error";

/// Executes a claimed job.
pub struct Worker {
    job: Job,
    executor: Arc<dyn QueryExecutor>,
}

impl Worker {
    pub(crate) fn new(job: Job, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { job, executor }
    }

    /// Runs the job and finalises its state.
    pub async fn run(self) {
        let table = self
            .job
            .table()
            .map(|t| t.name().to_string())
            .unwrap_or_default();
        let span = job_span("run", &self.job.id().to_string(), &table);
        self.run_inner().instrument(span).await;
    }

    async fn run_inner(self) {
        let started = Instant::now();
        let result = AssertUnwindSafe(self.execute())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Executor {
                message: panic_message(panic.as_ref()),
            }));

        if let Err(e) = result {
            error!(job_id = %self.job.id(), error = %e, "job execution failed");
            match self.job.done() {
                Ok(false) => {
                    if let Err(mark) = self.job.mark_error(e.to_string()) {
                        error!(job_id = %self.job.id(), error = %mark, "failed to record job error");
                    }
                }
                Ok(true) => {}
                Err(lookup) => debug!(job_id = %self.job.id(), error = %lookup, "job vanished while running"),
            }
        }

        let status = self.job.status().map_or("deleted", |s| s.as_label());
        self.job
            .store()
            .metrics()
            .observe_duration(status, started.elapsed());
        info!(job_id = %self.job.id(), status, elapsed = ?started.elapsed(), "job finished");

        if let Err(e) = self.job.dereference() {
            debug!(job_id = %self.job.id(), error = %e, "job deleted before worker released it");
        }
    }

    async fn execute(&self) -> Result<()> {
        let cancel = self.job.cancellation()?;
        if cancel.is_cancelled() {
            return Ok(());
        }
        let record = self.job.record()?;
        let table = Arc::clone(&record.table);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(job_id = %self.job.id(), "job cancelled while running");
                return Ok(());
            }
            outcome = self.executor.run(&table, &self.job) => outcome,
        };

        let data = match outcome.map_err(|e| Error::Executor {
            message: e.message().to_string(),
        })? {
            QueryOutcome::Failed => {
                self.fail_unknown()?;
                return Ok(());
            }
            QueryOutcome::Data(data) => data,
        };

        let frame = match data {
            QueryData::Rows(rows) if !rows.is_empty() => {
                Some(coerce::frame_from_rows(&table, rows)?)
            }
            QueryData::Frame(mut frame) => {
                coerce::coerce_frame(&table, &mut frame);
                Some(frame)
            }
            QueryData::Rows(_) | QueryData::Empty => None,
        };

        if cancel.is_cancelled() || self.job.done()? {
            return Ok(());
        }

        if let Some(frame) = frame {
            let frame = synthetic::compute_synthetic(&table, &record.criteria, frame)?;
            debug!(job_id = %self.job.id(), rows = frame.len(), "storing job result");
            self.job.store().results().store(&record.handle, frame)?;
        } else {
            debug!(job_id = %self.job.id(), "query returned no data");
        }

        let mut update = JobUpdate::complete();
        if self.job.record()?.actual_criteria.is_none() {
            update = update.with_actual_criteria(record.criteria.clone());
        }
        match self.job.store().update(self.job.id(), update) {
            Ok(()) => Ok(()),
            // cancelled between the check above and here
            Err(Error::InvalidStateTransition { .. }) if matches!(self.job.done(), Ok(true)) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Handles an executor that reported failure.
    fn fail_unknown(&self) -> Result<()> {
        let record = self.job.record()?;
        if record.status == JobStatus::Error {
            if record.message.is_empty() {
                self.job
                    .store()
                    .update(self.job.id(), JobUpdate::error(UNKNOWN_ERROR_MESSAGE))?;
            }
            return Ok(());
        }
        if record.done() {
            return Ok(());
        }
        self.job.mark_error(UNKNOWN_ERROR_MESSAGE)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("query executor panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("query executor panicked: {s}")
    } else {
        "query executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use netportal_core::TableId;

    use super::*;
    use crate::config::JobStoreConfig;
    use crate::criteria::Criteria;
    use crate::executor::{ExecutorError, ExecutorRegistry, FailingExecutor};
    use crate::store::{InMemoryResultStore, JobStore};
    use crate::table::{Column, Table};
    use crate::value::Value;

    struct Rows;

    #[async_trait]
    impl QueryExecutor for Rows {
        async fn run(&self, _table: &Table, job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
            job.mark_progress(50, Some(1))?;
            Ok(QueryOutcome::rows(vec![
                vec![Value::from("a"), Value::from("10")],
                vec![Value::from("b"), Value::from("30")],
            ]))
        }
    }

    struct SilentFailure;

    #[async_trait]
    impl QueryExecutor for SilentFailure {
        async fn run(&self, _table: &Table, _job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
            Ok(QueryOutcome::Failed)
        }
    }

    struct ReportedFailure;

    #[async_trait]
    impl QueryExecutor for ReportedFailure {
        async fn run(&self, _table: &Table, job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
            job.mark_error("device unreachable")?;
            Ok(QueryOutcome::Failed)
        }
    }

    struct Panics;

    #[async_trait]
    impl QueryExecutor for Panics {
        async fn run(&self, _table: &Table, _job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
            panic!("executor bug");
        }
    }

    fn store() -> JobStore {
        let executors = ExecutorRegistry::new()
            .with("rows", Rows)
            .with("silent", SilentFailure)
            .with("reported", ReportedFailure)
            .with("panics", Panics)
            .with("failing", FailingExecutor::new("connection refused"));
        JobStore::with_result_store(
            executors,
            JobStoreConfig::default().inline(),
            Arc::new(InMemoryResultStore::new()),
        )
    }

    fn table(executor: &str) -> Arc<Table> {
        Arc::new(
            Table::new(TableId::new(1), "traffic", executor)
                .column(Column::new("host").key())
                .column(Column::new("bytes"))
                .column(Column::new("kbytes").synthetic("{bytes} / 1000")),
        )
    }

    async fn run(executor: &str) -> Job {
        let store = store();
        let job = store.create(table(executor), Criteria::new()).unwrap();
        job.start().await.unwrap();
        job
    }

    #[tokio::test]
    async fn rows_are_coerced_computed_and_stored() {
        let job = run("rows").await;
        let record = job.record().unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.progress, 100);
        assert_eq!(record.refcount, 0);
        assert!(record.actual_criteria.is_some());
        assert_eq!(
            job.values().unwrap(),
            vec![
                vec![Value::from("a"), Value::Int(10), Value::Float(0.01)],
                vec![Value::from("b"), Value::Int(30), Value::Float(0.03)],
            ]
        );
    }

    #[tokio::test]
    async fn silent_failure_gets_generic_message() {
        let job = run("silent").await;
        assert_eq!(job.status().unwrap(), JobStatus::Error);
        assert_eq!(job.message().unwrap(), UNKNOWN_ERROR_MESSAGE);
        assert_eq!(job.progress().unwrap(), 100);
    }

    #[tokio::test]
    async fn reported_failure_keeps_its_message() {
        let job = run("reported").await;
        assert_eq!(job.status().unwrap(), JobStatus::Error);
        assert_eq!(job.message().unwrap(), "device unreachable");
    }

    #[tokio::test]
    async fn executor_errors_are_captured() {
        let job = run("failing").await;
        assert_eq!(job.status().unwrap(), JobStatus::Error);
        assert!(job.message().unwrap().contains("connection refused"));
        assert_eq!(job.record().unwrap().refcount, 0);
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let job = run("panics").await;
        assert_eq!(job.status().unwrap(), JobStatus::Error);
        assert!(job.message().unwrap().contains("executor bug"));
        assert_eq!(job.record().unwrap().refcount, 0);
    }
}
