//! Job store configuration.
//!
//! Loaded from environment variables with [`JobStoreConfig::from_env`];
//! unset variables keep their defaults.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `NETPORTAL_JOB_AGE_INTERVAL_SECONDS` | 900 |
//! | `NETPORTAL_JOB_AGE_OLD_SECONDS` | 86400 |
//! | `NETPORTAL_JOB_AGE_ANCIENT_SECONDS` | 604800 |
//! | `NETPORTAL_THREADING` | true |
//! | `NETPORTAL_BATCH_POLL_MS` | 200 |
//! | `NETPORTAL_BATCH_SIZE` | 4 |
//! | `NETPORTAL_DATA_CACHE` | unset (results kept in memory) |

use std::path::PathBuf;
use std::time::Duration;

use netportal_core::config::{env_bool, env_string, env_u64, env_usize};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How [`crate::store::JobStore::start`] runs workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Each worker runs on its own tokio task; `start` returns immediately.
    #[default]
    Spawned,
    /// The worker runs to completion inside `start`.
    Inline,
}

/// Configuration for a [`crate::store::JobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreConfig {
    /// Minimum time between unforced aging sweeps.
    #[serde(with = "secs")]
    pub age_interval: Duration,
    /// Unreferenced jobs untouched this long are deleted.
    #[serde(with = "secs")]
    pub age_old: Duration,
    /// Jobs untouched this long are deleted even if referenced.
    #[serde(with = "secs")]
    pub age_ancient: Duration,
    /// Worker execution mode.
    pub execution: ExecutionMode,
    /// Upper bound on how long a batch runner waits between progress checks.
    #[serde(with = "millis")]
    pub batch_poll_interval: Duration,
    /// Batch size used when a caller does not choose one.
    pub default_batch_size: usize,
    /// Directory for persisted results; `None` keeps results in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            age_interval: Duration::from_secs(15 * 60),
            age_old: Duration::from_secs(24 * 60 * 60),
            age_ancient: Duration::from_secs(7 * 24 * 60 * 60),
            execution: ExecutionMode::Spawned,
            batch_poll_interval: Duration::from_millis(200),
            default_batch_size: 4,
            data_dir: None,
        }
    }
}

impl JobStoreConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = env_u64("NETPORTAL_JOB_AGE_INTERVAL_SECONDS")? {
            config.age_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("NETPORTAL_JOB_AGE_OLD_SECONDS")? {
            config.age_old = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("NETPORTAL_JOB_AGE_ANCIENT_SECONDS")? {
            config.age_ancient = Duration::from_secs(secs);
        }
        if let Some(threading) = env_bool("NETPORTAL_THREADING")? {
            config.execution = if threading {
                ExecutionMode::Spawned
            } else {
                ExecutionMode::Inline
            };
        }
        if let Some(ms) = env_u64("NETPORTAL_BATCH_POLL_MS")? {
            config.batch_poll_interval = Duration::from_millis(ms);
        }
        if let Some(size) = env_usize("NETPORTAL_BATCH_SIZE")? {
            config.default_batch_size = size;
        }
        config.data_dir = env_string("NETPORTAL_DATA_CACHE").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the store cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.default_batch_size == 0 {
            return Err(Error::configuration("default_batch_size must be at least 1"));
        }
        if self.batch_poll_interval.is_zero() {
            return Err(Error::configuration("batch_poll_interval must be positive"));
        }
        if self.age_ancient < self.age_old {
            return Err(Error::configuration(
                "age_ancient must not be shorter than age_old",
            ));
        }
        Ok(())
    }

    /// Returns a copy with inline execution.
    #[must_use]
    pub fn inline(mut self) -> Self {
        self.execution = ExecutionMode::Inline;
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
