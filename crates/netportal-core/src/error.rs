//! Error types and result aliases shared by netportal crates.

/// The result type used by `netportal-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A configuration value could not be used.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the offending setting.
        message: String,
    },
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_display() {
        let err = Error::invalid_config("NETPORTAL_BATCH_SIZE must be a usize");
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("NETPORTAL_BATCH_SIZE"));
    }
}
