//! # netportal-jobs
//!
//! Criteria resolution, job caching and batch scheduling for netportal
//! reports.
//!
//! - **Field resolution**: user input is bound to typed fields and missing
//!   values are derived from templates and hooks in dependency order
//! - **Cache keys**: equivalent requests map to the same handle, so one job
//!   can serve many callers
//! - **Job lifecycle**: jobs are shared as parent/child pairs,
//!   reference-counted while in use, and aged out when idle
//! - **Workers**: query results are coerced, extended with synthetic
//!   columns, resampled and stored under the job's handle
//! - **Batches**: dependent jobs run in a bounded sliding window that
//!   reports aggregate progress to the job that needs them
//!
//! ## Core Concepts
//!
//! - **Table**: what to run; its columns, accepted fields and cache policy
//! - **Criteria**: the resolved inputs of one request
//! - **Job**: one execution of a table for some criteria
//! - **Handle**: the cache key of a job's result
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use netportal_core::TableId;
//! use netportal_jobs::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let table = Arc::new(
//!     Table::new(TableId::new(1), "traffic", "empty")
//!         .column(Column::time("time"))
//!         .column(Column::new("bytes")),
//! );
//! let store = JobStore::new(ExecutorRegistry::new().with("empty", EmptyExecutor));
//!
//! let criteria = Criteria::new()
//!     .with(ENDTIME, "2024-01-01T11:00:00Z")
//!     .with(DURATION, "5min");
//! let job = store.create(table, criteria)?;
//! job.start().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

// Internal modules - not exposed in public API.
pub(crate) mod dag;

pub mod analysis;
pub mod batch;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod criteria;
pub mod error;
pub mod executor;
pub mod field;
pub mod frame;
pub mod handle;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod resolver;
pub mod store;
pub mod synthetic;
pub mod table;
pub mod template;
pub mod value;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::analysis::{AnalysisContext, AnalysisExecutor, Inputs};
    pub use crate::batch::{BatchReport, BatchRunner};
    pub use crate::catalog::{InMemoryCatalog, TableCatalog};
    pub use crate::config::{ExecutionMode, JobStoreConfig};
    pub use crate::criteria::{Criteria, DURATION, ENDTIME, IGNORE_CACHE, STARTTIME};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::executor::{
        EmptyExecutor, ExecutorError, ExecutorRegistry, FailingExecutor, QueryData,
        QueryExecutor, QueryOutcome,
    };
    pub use crate::field::{Field, FieldKind, FieldOptions, PostProcessHook, PreProcessHook};
    pub use crate::frame::Frame;
    pub use crate::handle::compute_handle;
    pub use crate::job::{JobRecord, JobSnapshot, JobStatus, JobUpdate};
    pub use crate::pool::{ConnectionPool, PooledExecutor, DEVICE};
    pub use crate::resolver::Resolver;
    pub use crate::store::{AgeReport, AgeRequest, Job, JobStore};
    pub use crate::table::{BucketLabel, Column, DataType, ResampleOp, Table};
    pub use crate::template::Template;
    pub use crate::value::Value;
}

pub use error::{Error, Result};
pub use store::{Job, JobStore};
