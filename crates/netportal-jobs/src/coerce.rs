//! Column coercion applied to executor results.
//!
//! Time columns are normalised value by value to UTC times, whether the
//! executor produced epoch seconds, epoch milliseconds, strings or native
//! times. Numeric columns are converted as a whole or not at all: if any
//! value cannot be read as a number the column is left untouched.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::frame::Frame;
use crate::table::{DataType, Table};
use crate::value::{parse_datetime, Value};

/// Epoch values at or above this magnitude are read as milliseconds.
///
/// 1e11 seconds is in the year 5138; 1e11 milliseconds is March 1973.
pub const MILLIS_THRESHOLD: f64 = 1e11;

/// Builds a frame from rows aligned to the table's non-synthetic columns
/// and coerces it.
///
/// # Errors
///
/// Returns [`crate::Error::Executor`] if a row's width does not match.
pub fn frame_from_rows(table: &Table, rows: Vec<Vec<Value>>) -> Result<Frame> {
    let mut frame = Frame::from_rows(&table.source_column_names(), rows)?;
    coerce_frame(table, &mut frame);
    Ok(frame)
}

/// Coerces every column of `frame` the table declares.
pub fn coerce_frame(table: &Table, frame: &mut Frame) {
    for column in table.columns() {
        let Some(values) = frame.column_mut(column.name()) else {
            continue;
        };
        if column.data_type() == DataType::Time {
            for value in values.iter_mut() {
                *value = coerce_time(value);
            }
        } else if column.is_numeric() && !coerce_numeric(values) {
            debug!(column = column.name(), "left non-numeric column as returned");
        }
    }
}

/// Converts a value to a time, or returns it unchanged if it is not one.
#[must_use]
pub fn coerce_time(value: &Value) -> Value {
    let converted = match value {
        Value::Int(n) => from_epoch_int(*n),
        Value::Float(f) => from_epoch_float(*f),
        Value::Str(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                from_epoch_int(n)
            } else if let Ok(f) = s.parse::<f64>() {
                from_epoch_float(f)
            } else {
                parse_datetime(s).ok()
            }
        }
        _ => None,
    };
    converted.map_or_else(|| value.clone(), Value::Time)
}

#[allow(clippy::cast_precision_loss)]
fn from_epoch_int(n: i64) -> Option<DateTime<Utc>> {
    if (n as f64).abs() >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch_float(f: f64) -> Option<DateTime<Utc>> {
    if !f.is_finite() {
        return None;
    }
    let millis = if f.abs() >= MILLIS_THRESHOLD {
        f.round()
    } else {
        (f * 1000.0).round()
    };
    if millis.abs() >= 9.2e18 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

/// Converts a column to numbers in place. Returns false, leaving the
/// column unchanged, if any value is not numeric.
pub fn coerce_numeric(values: &mut [Value]) -> bool {
    let Some(converted) = values.iter().map(to_number).collect::<Option<Vec<_>>>() else {
        return false;
    };
    for (slot, value) in values.iter_mut().zip(converted) {
        *slot = value;
    }
    true
}

fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Null | Value::Int(_) | Value::Float(_) => Some(value.clone()),
        Value::Bool(b) => Some(Value::Int(i64::from(*b))),
        Value::Str(s) => {
            let s = s.trim();
            if s.is_empty() {
                Some(Value::Null)
            } else if let Ok(n) = s.parse::<i64>() {
                Some(Value::Int(n))
            } else {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Value::Float)
            }
        }
        Value::Time(_) | Value::Duration(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use netportal_core::TableId;

    use super::*;
    use crate::table::Column;

    fn ten_oclock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn seconds_and_millis_normalise_to_the_same_time() {
        let secs = ten_oclock().timestamp();
        let expected = Value::Time(ten_oclock());
        assert_eq!(coerce_time(&Value::Int(secs)), expected);
        assert_eq!(coerce_time(&Value::Int(secs * 1000)), expected);
        #[allow(clippy::cast_precision_loss)]
        let float_secs = secs as f64;
        assert_eq!(coerce_time(&Value::Float(float_secs)), expected);
        assert_eq!(coerce_time(&Value::from(secs.to_string())), expected);
        assert_eq!(coerce_time(&Value::from("2024-01-01T10:00:00Z")), expected);
        assert_eq!(coerce_time(&expected), expected);
    }

    #[test]
    fn fractional_seconds_keep_millis() {
        let secs = ten_oclock().timestamp();
        #[allow(clippy::cast_precision_loss)]
        let value = Value::Float(secs as f64 + 0.25);
        let Value::Time(t) = coerce_time(&value) else {
            panic!("expected a time");
        };
        assert_eq!(t.timestamp_millis(), secs * 1000 + 250);
    }

    #[test]
    fn unparsable_time_is_left_alone() {
        let value = Value::from("soon");
        assert_eq!(coerce_time(&value), value);
        assert_eq!(coerce_time(&Value::Null), Value::Null);
    }

    #[test]
    fn numeric_column_converts_all_or_nothing() {
        let mut good = vec![Value::from("1"), Value::from("2.5"), Value::from(""), Value::Null];
        assert!(coerce_numeric(&mut good));
        assert_eq!(
            good,
            vec![Value::Int(1), Value::Float(2.5), Value::Null, Value::Null]
        );

        let mut bad = vec![Value::from("1"), Value::from("n/a")];
        assert!(!coerce_numeric(&mut bad));
        assert_eq!(bad, vec![Value::from("1"), Value::from("n/a")]);
    }

    #[test]
    fn frame_from_rows_coerces_declared_columns() {
        let table = Table::new(TableId::new(1), "t", "x")
            .column(Column::time("time"))
            .column(Column::new("host").key())
            .column(Column::new("bytes"))
            .column(Column::new("rate").synthetic("{bytes} / 60"));
        let secs = ten_oclock().timestamp();
        let frame = frame_from_rows(
            &table,
            vec![vec![Value::Int(secs), Value::from("a"), Value::from("120")]],
        )
        .unwrap();

        assert_eq!(frame.get(0, "time"), Some(&Value::Time(ten_oclock())));
        assert_eq!(frame.get(0, "host"), Some(&Value::from("a")));
        assert_eq!(frame.get(0, "bytes"), Some(&Value::Int(120)));
        assert!(!frame.has_column("rate"));
    }
}
