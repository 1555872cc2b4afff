//! Identifiers for jobs and report tables.
//!
//! A [`JobId`] is minted by the job store for every request, including
//! requests that end up as children of an existing job. It wraps a ULID, so
//! IDs compare in creation order and the store can pick the oldest job for
//! a cache handle without a separate sequence.
//!
//! A [`TableId`] is the number a table definition carries in the catalog.
//! It feeds the cache handle, so two definitions loaded from the same
//! catalog entry share cached results.
//!
//! ```rust
//! use netportal_core::id::{JobId, TableId};
//!
//! let job = JobId::generate();
//! assert!(job.created_at() <= chrono::Utc::now());
//!
//! let table: TableId = "7".parse().unwrap();
//! assert_eq!(table, TableId::new(7));
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Identity of one job in the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    /// Mints a fresh job ID stamped with the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// When the ID was minted, to millisecond precision.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        i64::try_from(self.0.timestamp_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    /// Parses the 26-character form printed by `Display`, in either case.
    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s.trim()).map(Self).map_err(|e| Error::InvalidId {
            message: format!("'{s}' is not a job ID ({e})"),
        })
    }
}

/// Catalog number of a table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(u64);

impl TableId {
    /// Wraps a catalog number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The catalog number.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TableId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TableId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<u64>() {
            Ok(id) => Ok(Self(id)),
            Err(e) => Err(Error::InvalidId {
                message: format!("'{s}' is not a table number ({e})"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_parse_what_they_print() {
        let id = JobId::generate();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert_eq!(id.to_string().to_lowercase().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn job_ids_carry_their_mint_time() {
        let before = Utc::now().timestamp_millis();
        let id = JobId::generate();
        let minted = id.created_at().timestamp_millis();
        assert!(minted >= before - 1);
        assert!(minted <= Utc::now().timestamp_millis());
    }

    #[test]
    fn later_job_ids_sort_after_earlier_ones() {
        let first = JobId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = JobId::generate();
        assert!(first < second);
    }

    #[test]
    fn table_ids_accept_padded_numbers() {
        let id: TableId = " 42 ".parse().unwrap();
        assert_eq!(id, TableId::from(42));
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn malformed_ids_name_the_input() {
        let err = "not-a-job".parse::<JobId>().unwrap_err();
        assert!(err.to_string().contains("'not-a-job' is not a job ID"));
        let err = "abc".parse::<TableId>().unwrap_err();
        assert!(err.to_string().contains("'abc' is not a table number"));
    }

    #[test]
    fn table_ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&TableId::new(3)).unwrap(), "3");
        assert_eq!(serde_json::from_str::<TableId>("3").unwrap(), TableId::new(3));
    }
}
