//! Query executor trait and registry.
//!
//! Each table names an executor capability. Capabilities are registered
//! once, when configuration is loaded, and looked up by the job store when
//! a job starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::frame::Frame;
use crate::store::Job;
use crate::table::Table;
use crate::value::Value;

/// Data returned by a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    /// Rows aligned to the table's non-synthetic columns.
    Rows(Vec<Vec<Value>>),
    /// An already-structured result.
    Frame(Frame),
    /// The query ran but produced no data.
    Empty,
}

/// Outcome of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The query produced data (possibly none).
    Data(QueryData),
    /// The query failed. The executor should have called
    /// [`Job::mark_error`] with a message first.
    Failed,
}

impl QueryOutcome {
    /// Rows aligned to the table's non-synthetic columns.
    #[must_use]
    pub fn rows(rows: Vec<Vec<Value>>) -> Self {
        Self::Data(QueryData::Rows(rows))
    }

    /// An already-structured result.
    #[must_use]
    pub fn frame(frame: Frame) -> Self {
        Self::Data(QueryData::Frame(frame))
    }

    /// No data.
    #[must_use]
    pub fn empty() -> Self {
        Self::Data(QueryData::Empty)
    }
}

/// An unexpected executor failure.
///
/// The worker converts it into an `ERROR` status carrying the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
}

impl ExecutorError {
    /// Creates an executor error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<crate::error::Error> for ExecutorError {
    fn from(err: crate::error::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Runs the query behind a table.
///
/// Implementations report progress through [`Job::mark_progress`], may
/// record adjusted criteria through [`Job::set_actual_criteria`], and should
/// watch [`Job::cancellation`] for long-running work.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs the query for `job`.
    async fn run(&self, table: &Table, job: &Job) -> Result<QueryOutcome, ExecutorError>;
}

/// Maps executor capability IDs to executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn QueryExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`ExecutorRegistry::register`].
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, executor: impl QueryExecutor + 'static) -> Self {
        self.register(id, Arc::new(executor));
        self
    }

    /// Registers an executor, replacing any previous one with the same ID.
    pub fn register(&mut self, id: impl Into<String>, executor: Arc<dyn QueryExecutor>) {
        self.executors.insert(id.into(), executor);
    }

    /// Looks up an executor.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn QueryExecutor>> {
        self.executors.get(id).cloned()
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.executors.contains_key(id)
    }

    /// Returns the registered IDs, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.ids())
            .finish()
    }
}

/// An executor that succeeds with no data.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyExecutor;

#[async_trait]
impl QueryExecutor for EmptyExecutor {
    async fn run(&self, _table: &Table, _job: &Job) -> Result<QueryOutcome, ExecutorError> {
        Ok(QueryOutcome::empty())
    }
}

/// An executor that always fails with a fixed message.
#[derive(Debug, Clone)]
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    /// Creates a failing executor.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl QueryExecutor for FailingExecutor {
    async fn run(&self, _table: &Table, _job: &Job) -> Result<QueryOutcome, ExecutorError> {
        Err(ExecutorError::new(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        let registry = ExecutorRegistry::new()
            .with("empty", EmptyExecutor)
            .with("failing", FailingExecutor::new("down"));
        assert!(registry.contains("empty"));
        assert!(registry.get("failing").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.ids(), vec!["empty", "failing"]);
        assert!(format!("{registry:?}").contains("failing"));
    }

    #[test]
    fn executor_error_conversions() {
        let err: ExecutorError = anyhow::anyhow!("socket closed")
            .context("query failed")
            .into();
        assert_eq!(err.message(), "query failed: socket closed");

        let err: ExecutorError = crate::error::Error::configuration("bad").into();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn outcome_constructors() {
        assert_eq!(QueryOutcome::empty(), QueryOutcome::Data(QueryData::Empty));
        assert!(matches!(
            QueryOutcome::rows(vec![]),
            QueryOutcome::Data(QueryData::Rows(_))
        ));
    }
}
