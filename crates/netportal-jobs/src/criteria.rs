//! Resolved query criteria.
//!
//! [`Criteria`] maps keywords to values. Three keys get special treatment:
//! `starttime`, `endtime` and `duration` are reconciled by
//! [`Criteria::compute_times`], and the values originally supplied for them
//! are remembered so the criteria can be re-derived for another table by
//! [`Criteria::build_for_table`].

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::table::Table;
use crate::value::Value;

/// Start of the query window.
pub const STARTTIME: &str = "starttime";
/// End of the query window.
pub const ENDTIME: &str = "endtime";
/// Length of the query window.
pub const DURATION: &str = "duration";
/// Reserved flag that disables cache reuse.
pub const IGNORE_CACHE: &str = "ignore_cache";

const TIME_KEYS: [&str; 3] = [STARTTIME, ENDTIME, DURATION];

/// A mapping from keyword to resolved value.
///
/// Keys are kept sorted so iteration (and therefore hashing) is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    original_times: BTreeMap<String, Value>,
}

impl Criteria {
    /// Creates empty criteria.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Criteria::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Sets a value. Values set for the time keys are remembered as originals.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if TIME_KEYS.contains(&key.as_str()) {
            self.original_times.insert(key.clone(), value.clone());
        }
        self.values.insert(key, value);
    }

    /// Removes a value, including any remembered original.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.original_times.remove(key);
        self.values.remove(key)
    }

    /// Returns true if `key` has a value (possibly `Null`).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Returns the resolved start time.
    #[must_use]
    pub fn starttime(&self) -> Option<DateTime<Utc>> {
        self.get(STARTTIME).and_then(Value::to_time)
    }

    /// Returns the resolved end time.
    #[must_use]
    pub fn endtime(&self) -> Option<DateTime<Utc>> {
        self.get(ENDTIME).and_then(Value::to_time)
    }

    /// Returns the resolved duration.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.get(DURATION).and_then(Value::to_duration)
    }

    /// Returns a duration-valued criterion such as `resolution`.
    #[must_use]
    pub fn duration_of(&self, key: &str) -> Option<Duration> {
        self.get(key).and_then(Value::to_duration)
    }

    /// Returns true when cache reuse is disabled for these criteria.
    #[must_use]
    pub fn ignore_cache(&self) -> bool {
        self.get(IGNORE_CACHE).is_some_and(Value::is_truthy)
    }

    /// Reconciles the time keys against the current time.
    ///
    /// # Errors
    ///
    /// See [`Criteria::compute_times_at`].
    pub fn compute_times(&mut self) -> Result<()> {
        self.compute_times_at(Utc::now())
    }

    /// Reconciles `starttime`, `endtime` and `duration` from their original
    /// values.
    ///
    /// - start and end: duration is their difference
    /// - start and duration: end is derived
    /// - no start: end defaults to `now`, start is end minus duration
    ///
    /// # Errors
    ///
    /// Returns [`Error::CannotComputeTimes`] when no duration can be found
    /// for the combination supplied, and [`Error::InvalidValue`] when a time
    /// key holds something that is not a time or duration.
    pub fn compute_times_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        let start = self.original_time(STARTTIME)?;
        let end = self.original_time(ENDTIME)?;
        let duration = self.original_duration()?;

        let (start, end, duration) = match (start, end, duration) {
            (Some(start), Some(end), _) => (start, end, end - start),
            (Some(start), None, Some(duration)) => (start, start + duration, duration),
            (Some(_), None, None) => {
                return Err(Error::CannotComputeTimes {
                    message: "starttime given without endtime or duration".into(),
                })
            }
            (None, end, Some(duration)) => {
                let end = end.unwrap_or(now);
                (end - duration, end, duration)
            }
            (None, _, None) => {
                return Err(Error::CannotComputeTimes {
                    message: "no starttime and no duration".into(),
                })
            }
        };

        self.values.insert(STARTTIME.into(), Value::Time(start));
        self.values.insert(ENDTIME.into(), Value::Time(end));
        self.values.insert(DURATION.into(), Value::Duration(duration));
        Ok(())
    }

    /// Builds criteria for running `table`: original time keys are restored,
    /// the table's default criteria fill any gaps and times are re-derived.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] when a time key cannot be parsed.
    /// Missing time information is tolerated.
    pub fn build_for_table(&self, table: &Table) -> Result<Self> {
        let mut out = Self {
            values: self
                .values
                .iter()
                .filter(|(k, _)| !TIME_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            original_times: BTreeMap::new(),
        };
        for (k, v) in &self.original_times {
            out.set(k.clone(), v.clone());
        }
        for (k, v) in table.criteria_defaults() {
            if out.get(k).map_or(true, Value::is_null) {
                out.set(k.clone(), v.clone());
            }
        }
        match out.compute_times() {
            Ok(()) | Err(Error::CannotComputeTimes { .. }) => Ok(out),
            Err(e) => Err(e),
        }
    }

    /// Only supplied values count; the window written by a previous
    /// reconciliation never feeds the next one.
    fn original(&self, key: &str) -> Option<&Value> {
        self.original_times.get(key).filter(|v| !v.is_null())
    }

    fn original_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        self.original(key)
            .map(|v| {
                v.to_time().ok_or_else(|| Error::InvalidValue {
                    keyword: key.to_string(),
                    message: format!("'{v}' is not a time"),
                })
            })
            .transpose()
    }

    fn original_duration(&self) -> Result<Option<Duration>> {
        self.original(DURATION)
            .map(|v| {
                v.to_duration().ok_or_else(|| Error::InvalidValue {
                    keyword: DURATION.to_string(),
                    message: format!("'{v}' is not a duration"),
                })
            })
            .transpose()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut criteria = Self::new();
        for (k, v) in iter {
            criteria.set(k, v);
        }
        criteria
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use netportal_core::TableId;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 12, 1, h, m, 0).unwrap()
    }

    #[test]
    fn end_and_duration_derive_start() {
        let mut c = Criteria::new()
            .with(ENDTIME, "12/1/2013 11:00 am +0000")
            .with(DURATION, "5 min");
        c.compute_times_at(at(12, 0)).unwrap();
        assert_eq!(c.starttime(), Some(at(10, 55)));
        assert_eq!(c.endtime(), Some(at(11, 0)));
        assert_eq!(c.duration(), Some(Duration::minutes(5)));
    }

    #[test]
    fn start_and_end_derive_duration() {
        let mut c = Criteria::new()
            .with(STARTTIME, at(10, 0))
            .with(ENDTIME, at(11, 0));
        c.compute_times_at(at(12, 0)).unwrap();
        assert_eq!(c.duration(), Some(Duration::hours(1)));
    }

    #[test]
    fn start_and_duration_derive_end() {
        let mut c = Criteria::new()
            .with(STARTTIME, at(10, 0))
            .with(DURATION, "1 week");
        c.compute_times_at(at(12, 0)).unwrap();
        assert_eq!(c.endtime(), Some(at(10, 0) + Duration::weeks(1)));
    }

    #[test]
    fn duration_alone_ends_now() {
        let mut c = Criteria::new().with(DURATION, "1 day");
        c.compute_times_at(at(12, 0)).unwrap();
        assert_eq!(c.endtime(), Some(at(12, 0)));
        assert_eq!(c.starttime(), Some(at(12, 0) - Duration::days(1)));
    }

    #[test]
    fn missing_duration_cannot_compute() {
        let mut c = Criteria::new().with(ENDTIME, at(11, 0));
        assert!(matches!(
            c.compute_times_at(at(12, 0)),
            Err(Error::CannotComputeTimes { .. })
        ));
        let mut c = Criteria::new();
        assert!(matches!(
            c.compute_times_at(at(12, 0)),
            Err(Error::CannotComputeTimes { .. })
        ));
    }

    #[test]
    fn bad_time_is_invalid_value() {
        let mut c = Criteria::new()
            .with(ENDTIME, "12/1f/2013 11:00 am +0000")
            .with(DURATION, "5 min");
        assert!(matches!(
            c.compute_times_at(at(12, 0)),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn recompute_uses_originals() {
        let mut c = Criteria::new().with(DURATION, "1 hour");
        c.compute_times_at(at(10, 0)).unwrap();
        c.compute_times_at(at(12, 0)).unwrap();
        assert_eq!(c.endtime(), Some(at(12, 0)));
        assert_eq!(c.starttime(), Some(at(11, 0)));
    }

    #[test]
    fn reconciled_criteria_follow_the_clock() {
        let mut first = Criteria::new().with(DURATION, "1 hour").with("host", "sh1");
        first.compute_times_at(at(10, 0)).unwrap();

        let mut again = first.clone();
        again.compute_times_at(at(12, 30)).unwrap();
        assert_eq!(again.starttime(), Some(at(11, 30)));
        assert_eq!(again.endtime(), Some(at(12, 30)));
        assert_eq!(again.get("host"), Some(&Value::from("sh1")));
        assert_ne!(again, first);
    }

    #[test]
    fn removed_time_key_is_not_recovered() {
        let mut c = Criteria::new()
            .with(STARTTIME, at(9, 0))
            .with(DURATION, "1 hour");
        c.compute_times_at(at(12, 0)).unwrap();
        c.remove(STARTTIME);
        c.compute_times_at(at(12, 0)).unwrap();
        assert_eq!(c.starttime(), Some(at(11, 0)));
    }

    #[test]
    fn build_for_table_restores_originals_and_applies_defaults() {
        let table = Table::new(TableId::new(7), "dep", "static")
            .criteria_default("resolution", "1 min")
            .criteria_default(DURATION, "1 day");
        let mut c = Criteria::new()
            .with(ENDTIME, at(11, 0))
            .with(DURATION, "5 min")
            .with("host", "sh1");
        c.compute_times_at(at(12, 0)).unwrap();

        let built = c.build_for_table(&table).unwrap();
        assert_eq!(built.starttime(), Some(at(10, 55)));
        assert_eq!(built.get("host"), Some(&Value::from("sh1")));
        assert_eq!(built.get("resolution"), Some(&Value::from("1 min")));
    }

    #[test]
    fn ignore_cache_flag() {
        assert!(Criteria::new().with(IGNORE_CACHE, true).ignore_cache());
        assert!(!Criteria::new().with(IGNORE_CACHE, "false").ignore_cache());
        assert!(!Criteria::new().ignore_cache());
    }

    #[test]
    fn iteration_is_sorted() {
        let c: Criteria = [("b", 2), ("a", 1), ("c", 3)].into_iter().collect();
        let keys: Vec<_> = c.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
