//! Executor for tables computed from other tables.
//!
//! An analysis table names its input tables. Running it creates one
//! dependent job per input (criteria rebuilt for that input's table), runs
//! them through a [`BatchRunner`] mapped into progress 0..70, then hands
//! the input frames to a user analysis function, whose own progress maps
//! into 70..100. The result is sorted by the table's sort column,
//! descending with nulls last, and cut to the table's row limit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::batch::BatchRunner;
use crate::catalog::TableCatalog;
use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::executor::{ExecutorError, QueryExecutor, QueryOutcome};
use crate::frame::Frame;
use crate::job::JobStatus;
use crate::store::Job;
use crate::table::Table;

/// Progress reached once every dependent job is done.
pub const DEPENDENTS_DONE_PROGRESS: i32 = 70;

/// Named input frames handed to an analysis function.
pub type Inputs = BTreeMap<String, Arc<Frame>>;

/// An analysis function. Returning `None` means "no data".
pub type AnalysisFn =
    dyn Fn(&AnalysisContext<'_>, &Inputs) -> anyhow::Result<Option<Frame>> + Send + Sync;

/// What an analysis function can see and report.
pub struct AnalysisContext<'a> {
    job: &'a Job,
    table: &'a Table,
    criteria: &'a Criteria,
}

impl AnalysisContext<'_> {
    /// The analysis job.
    #[must_use]
    pub fn job(&self) -> &Job {
        self.job
    }

    /// The analysis table.
    #[must_use]
    pub fn table(&self) -> &Table {
        self.table
    }

    /// The analysis job's criteria.
    #[must_use]
    pub fn criteria(&self) -> &Criteria {
        self.criteria
    }

    /// Reports analysis progress in 0..=100, mapped into 70..=100 on the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job already finished.
    pub fn mark_progress(&self, progress: i32) -> Result<()> {
        let span = 100 - DEPENDENTS_DONE_PROGRESS;
        let mapped = DEPENDENTS_DONE_PROGRESS + progress.clamp(0, 100) * span / 100;
        self.job.mark_progress(mapped, None)
    }
}

/// Runs input tables as dependent jobs and combines their results.
#[derive(Clone)]
pub struct AnalysisExecutor {
    inputs: Vec<(String, Arc<Table>)>,
    func: Arc<AnalysisFn>,
    batch_size: Option<usize>,
}

impl AnalysisExecutor {
    /// Creates an executor with no inputs.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&AnalysisContext<'_>, &Inputs) -> anyhow::Result<Option<Frame>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            inputs: Vec::new(),
            func: Arc::new(func),
            batch_size: None,
        }
    }

    /// Adds an input table under `name`.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, table: Arc<Table>) -> Self {
        self.inputs.push((name.into(), table));
        self
    }

    /// Adds an input looked up by table name in `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the catalog has no such table.
    pub fn input_from(
        self,
        catalog: &dyn TableCatalog,
        name: impl Into<String>,
        table_name: &str,
    ) -> Result<Self> {
        let table = catalog.table_by_name(table_name).ok_or_else(|| {
            Error::configuration(format!("analysis input table '{table_name}' is not defined"))
        })?;
        Ok(self.input(name, table))
    }

    /// Overrides the store's default batch size for dependents.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Returns the input names in order.
    #[must_use]
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|(n, _)| n.as_str()).collect()
    }

    async fn run_dependents(&self, job: &Job, held: &mut Held) -> Result<Option<Inputs>> {
        let store = job.store();
        let criteria = job.criteria()?;
        let mut named = Vec::with_capacity(self.inputs.len());
        for (name, table) in &self.inputs {
            let dep_criteria = criteria.build_for_table(table)?;
            let dep = store.create(Arc::clone(table), dep_criteria)?;
            dep.reference()?;
            held.0.push(dep.clone());
            debug!(input = %name, job_id = %dep.id(), "created dependent job");
            named.push((name.clone(), dep));
        }

        let mut runner = BatchRunner::new(job.clone())
            .progress_range(0, DEPENDENTS_DONE_PROGRESS)
            .jobs(named.iter().map(|(_, dep)| dep.clone()));
        if let Some(size) = self.batch_size {
            runner = runner.batch_size(size);
        }
        let report = runner.run().await?;
        if report.abandoned {
            return Ok(None);
        }

        let mut inputs = Inputs::new();
        for (name, dep) in named {
            let record = dep.record()?;
            if record.status != JobStatus::Complete {
                job.mark_error(format!("Dependent job failed: {}", record.message))?;
                return Ok(None);
            }
            let frame = dep.data()?.unwrap_or_default();
            inputs.insert(name, frame);
        }
        Ok(Some(inputs))
    }
}

impl fmt::Debug for AnalysisExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisExecutor")
            .field("inputs", &self.input_names())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// References held on dependent jobs, released on drop.
struct Held(Vec<Job>);

impl Drop for Held {
    fn drop(&mut self) {
        for job in &self.0 {
            if let Err(e) = job.dereference() {
                warn!(job_id = %job.id(), error = %e, "failed to release dependent job");
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for AnalysisExecutor {
    async fn run(&self, table: &Table, job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
        let mut held = Held(Vec::new());
        let Some(inputs) = self.run_dependents(job, &mut held).await? else {
            return Ok(QueryOutcome::Failed);
        };

        let criteria = job.criteria()?;
        let ctx = AnalysisContext {
            job,
            table,
            criteria: &criteria,
        };
        let output = (self.func)(&ctx, &inputs)?;
        drop(held);

        let Some(mut frame) = output else {
            return Ok(QueryOutcome::empty());
        };
        if let Some(column) = table.sort_column() {
            frame.sort_desc_nulls_last(column);
        }
        if let Some(rows) = table.rows() {
            frame.truncate(rows);
        }
        Ok(QueryOutcome::frame(frame))
    }
}
