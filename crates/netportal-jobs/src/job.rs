//! Job records and the job state machine.
//!
//! ```text
//! NEW ──► RUNNING ──► COMPLETE
//!  │         │
//!  └─────────┴──────► ERROR
//! ```
//!
//! `COMPLETE` and `ERROR` are terminal. A child job never runs on its own;
//! its status is copied from its parent on every parent update.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use netportal_core::JobId;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::criteria::Criteria;
use crate::table::Table;
use crate::value::Value;

/// Progress value meaning "unknown".
pub const PROGRESS_UNKNOWN: i32 = -1;

/// Job status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not yet started.
    #[default]
    New,
    /// Executing.
    Running,
    /// Finished with a result.
    Complete,
    /// Finished with an error message.
    Error,
}

impl JobStatus {
    /// Returns true for `COMPLETE` and `ERROR`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Returns true if a job in this status may be shared by new requests.
    #[must_use]
    pub const fn is_reusable(&self) -> bool {
        matches!(self, Self::New | Self::Running | Self::Complete)
    }

    /// Returns true if moving to `target` is allowed.
    ///
    /// Staying in the same status is always allowed.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if *self == target {
            return true;
        }
        match self {
            Self::New => matches!(target, Self::Running | Self::Error),
            Self::Running => matches!(target, Self::Complete | Self::Error),
            Self::Complete | Self::Error => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A job row held by the job store.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Job identity.
    pub id: JobId,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last time the job was created, linked to or read as a parent.
    pub touched: DateTime<Utc>,
    /// Table the job runs.
    pub table: Arc<Table>,
    /// Criteria the job was created with (times reconciled).
    pub criteria: Criteria,
    /// Criteria as adjusted by the executor.
    pub actual_criteria: Option<Criteria>,
    /// Cache handle.
    pub handle: String,
    /// Current status.
    pub status: JobStatus,
    /// Human-readable message; set on error.
    pub message: String,
    /// Progress 0..=100, or [`PROGRESS_UNKNOWN`].
    pub progress: i32,
    /// Estimated seconds remaining.
    pub remaining: Option<u64>,
    /// Number of holders keeping the job and its data alive.
    pub refcount: u32,
    /// The job this one shadows, if it is a child.
    pub parent: Option<JobId>,
    pub(crate) cancel: CancellationToken,
}

impl JobRecord {
    /// Returns true if the job is a child of another job.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns true if the job reached a terminal status.
    #[must_use]
    pub fn done(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A partial update applied through [`crate::store::JobStore::update`].
///
/// Every set field is mirrored to the job's children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    /// New status.
    pub status: Option<JobStatus>,
    /// New message.
    pub message: Option<String>,
    /// New progress.
    pub progress: Option<i32>,
    /// New remaining-time estimate.
    pub remaining: Option<Option<u64>>,
    /// New actual criteria.
    pub actual_criteria: Option<Criteria>,
}

impl JobUpdate {
    /// `RUNNING` with the given progress and estimate.
    #[must_use]
    pub fn progress(progress: i32, remaining: Option<u64>) -> Self {
        Self {
            status: Some(JobStatus::Running),
            progress: Some(progress),
            remaining: Some(remaining),
            ..Self::default()
        }
    }

    /// `ERROR` at 100% with a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            message: Some(message.into()),
            progress: Some(100),
            ..Self::default()
        }
    }

    /// `COMPLETE` at 100% with an empty message.
    #[must_use]
    pub fn complete() -> Self {
        Self {
            status: Some(JobStatus::Complete),
            message: Some(String::new()),
            progress: Some(100),
            ..Self::default()
        }
    }

    /// Sets the actual criteria.
    #[must_use]
    pub fn with_actual_criteria(mut self, criteria: Criteria) -> Self {
        self.actual_criteria = Some(criteria);
        self
    }

    pub(crate) fn apply(&self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(message) = &self.message {
            record.message.clone_from(message);
        }
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(remaining) = self.remaining {
            record.remaining = remaining;
        }
        if let Some(criteria) = &self.actual_criteria {
            record.actual_criteria = Some(criteria.clone());
        }
    }
}

/// The flat poll structure exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job identity.
    pub id: JobId,
    /// Cache handle.
    pub handle: String,
    /// Current status.
    pub status: JobStatus,
    /// Progress 0..=100, or -1 when unknown.
    pub progress: i32,
    /// Estimated seconds remaining.
    pub remaining: Option<u64>,
    /// Human-readable message.
    pub message: String,
    /// Result rows in table column order; present once complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<Value>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::New.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Error.is_reusable());
    }

    #[test]
    fn transitions() {
        assert!(JobStatus::New.can_transition_to(JobStatus::Running));
        assert!(JobStatus::New.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::New.can_transition_to(JobStatus::Complete));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Complete));
        assert!(!JobStatus::Complete.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Error.can_transition_to(JobStatus::Error));
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Complete).unwrap(),
            "\"COMPLETE\""
        );
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
        assert_eq!(JobStatus::Running.as_label(), "running");
    }

    #[test]
    fn update_constructors() {
        let err = JobUpdate::error("boom");
        assert_eq!(err.status, Some(JobStatus::Error));
        assert_eq!(err.progress, Some(100));
        let done = JobUpdate::complete();
        assert_eq!(done.message.as_deref(), Some(""));
        let p = JobUpdate::progress(40, Some(12));
        assert_eq!(p.remaining, Some(Some(12)));
    }
}
