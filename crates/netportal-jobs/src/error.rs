//! Error types for criteria resolution and job execution.

use netportal_core::JobId;

/// The result type used throughout netportal-jobs.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Resolution, template, post-process and configuration errors are raised
/// synchronously and prevent job creation; executor errors are captured
/// into job state by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A field could not be resolved (missing value, cycle, bad input).
    Resolution,
    /// Template substitution failed.
    Template,
    /// A post-process hook failed or did not set its keyword.
    PostProcess,
    /// Table or column configuration cannot be executed.
    Configuration,
    /// A query executor failed.
    Executor,
    /// A job lookup or lifecycle operation was invalid.
    Job,
    /// The job or result store failed.
    Storage,
    /// A value could not be serialized or deserialized.
    Serialization,
}

/// Errors that can occur while resolving criteria or running jobs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two fields in one resolution scope share a keyword.
    #[error("duplicate field keyword: {keyword}")]
    DuplicateField {
        /// The repeated keyword.
        keyword: String,
    },

    /// A field names a parent that is not part of the resolution scope.
    #[error("field '{keyword}' has unknown parent '{parent}'")]
    UnknownParent {
        /// The field declaring the parent.
        keyword: String,
        /// The missing parent keyword.
        parent: String,
    },

    /// The parent graph of the fields contains a cycle.
    #[error("circular dependency among fields {fields:?} (cycle: {cycle:?})")]
    CircularDependency {
        /// Every field left unresolved when progress stopped.
        fields: Vec<String>,
        /// The fields that form the cycle itself.
        cycle: Vec<String>,
    },

    /// A required field has no value and no way to compute one.
    #[error("field '{keyword}' is required but has no value")]
    MissingValue {
        /// The field keyword.
        keyword: String,
    },

    /// A derived field has no value and no template or hook.
    #[error("field '{keyword}' has no value and no resolution method")]
    NoResolutionMethod {
        /// The field keyword.
        keyword: String,
    },

    /// A supplied value could not be parsed or is not an allowed choice.
    #[error("invalid value for '{keyword}': {message}")]
    InvalidValue {
        /// The field keyword.
        keyword: String,
        /// Description of the problem.
        message: String,
    },

    /// The time keys of a criteria cannot be reconciled.
    #[error("cannot compute times: {message}")]
    CannotComputeTimes {
        /// Description of the missing combination.
        message: String,
    },

    /// A pre-process hook failed.
    #[error("pre-process hook '{hook}' failed for field '{keyword}': {message}")]
    PreProcess {
        /// The field keyword.
        keyword: String,
        /// The hook name.
        hook: String,
        /// The hook's error message.
        message: String,
    },

    /// Template substitution failed.
    #[error("template '{template}' for field '{keyword}' failed: {message}")]
    Template {
        /// The field keyword.
        keyword: String,
        /// The template source.
        template: String,
        /// Description of the failure.
        message: String,
    },

    /// A post-process hook failed or did not set its keyword.
    #[error("post-process hook '{hook}' failed for field '{keyword}': {message}")]
    PostProcess {
        /// The field keyword.
        keyword: String,
        /// The hook name.
        hook: String,
        /// The hook's error message.
        message: String,
    },

    /// Table, column or executor configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A query executor failed.
    #[error("query executor failed: {message}")]
    Executor {
        /// The executor's error message.
        message: String,
    },

    /// A job was not found in the store.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: JobId,
    },

    /// Job data was requested before the job completed.
    #[error("job {job_id} is not complete (status {status})")]
    JobNotComplete {
        /// The job ID.
        job_id: JobId,
        /// The job's current status label.
        status: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from netportal-core.
    #[error("core error: {0}")]
    Core(#[from] netportal_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateField { .. }
            | Self::UnknownParent { .. }
            | Self::CircularDependency { .. }
            | Self::MissingValue { .. }
            | Self::NoResolutionMethod { .. }
            | Self::InvalidValue { .. }
            | Self::CannotComputeTimes { .. }
            | Self::PreProcess { .. } => ErrorKind::Resolution,
            Self::Template { .. } => ErrorKind::Template,
            Self::PostProcess { .. } => ErrorKind::PostProcess,
            Self::Configuration { .. } | Self::Core(_) => ErrorKind::Configuration,
            Self::Executor { .. } => ErrorKind::Executor,
            Self::JobNotFound { .. }
            | Self::JobNotComplete { .. }
            | Self::InvalidStateTransition { .. } => ErrorKind::Job,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Returns true when the error was raised during criteria resolution
    /// and therefore prevents job creation.
    #[must_use]
    pub const fn is_synchronous(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Resolution
                | ErrorKind::Template
                | ErrorKind::PostProcess
                | ErrorKind::Configuration
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn circular_error_display() {
        let err = Error::CircularDependency {
            fields: vec!["t1".into(), "t2".into(), "t3".into()],
            cycle: vec!["t1".into(), "t2".into(), "t3".into()],
        };
        assert!(err.to_string().contains("circular dependency"));
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn state_transition_error_display() {
        let err = Error::InvalidStateTransition {
            from: "COMPLETE".into(),
            to: "RUNNING".into(),
            reason: "terminal states are final".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("COMPLETE"));
        assert!(msg.contains("RUNNING"));
        assert_eq!(err.kind(), ErrorKind::Job);
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::storage_with_source("failed to read result", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn kinds_split_sync_from_async() {
        assert!(Error::configuration("no time column").is_synchronous());
        assert!(Error::Template {
            keyword: "k".into(),
            template: "{x}".into(),
            message: "missing keyword 'x'".into(),
        }
        .is_synchronous());
        assert!(!Error::Executor {
            message: "timeout".into()
        }
        .is_synchronous());
    }
}
