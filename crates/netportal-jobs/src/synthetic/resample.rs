//! Time-bucket resampling.
//!
//! Rows are grouped into fixed-width buckets aligned to the Unix epoch.
//! Every bucket between the first and last populated one is emitted, so
//! the output covers the input's time span without gaps. Rows without a
//! time are dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration};

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::table::{BucketLabel, ResampleOp, Table};
use crate::value::Value;

/// Smallest allowed bucket width.
pub const MIN_RESOLUTION_MS: i64 = 1000;

/// Resamples `frame` into buckets of `resolution` on the table's time
/// column, aggregating every other column with its declared operator.
/// Columns the table does not declare keep the first value in each bucket.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the table has no time column or the
/// resolution is below one second.
pub fn resample(table: &Table, frame: &Frame, resolution: Duration) -> Result<Frame> {
    let time_column = table
        .time_column()
        .ok_or_else(|| {
            Error::configuration(format!(
                "table '{}' is resampled but has no time column",
                table.name()
            ))
        })?
        .name();
    let width = resolution.num_milliseconds();
    if width < MIN_RESOLUTION_MS {
        return Err(Error::configuration(format!(
            "resample resolution must be at least 1s, got {width}ms"
        )));
    }

    let times = frame.column(time_column).unwrap_or_default();
    let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, value) in times.iter().enumerate() {
        if let Value::Time(t) = value {
            buckets
                .entry(t.timestamp_millis().div_euclid(width))
                .or_default()
                .push(row);
        }
    }

    let mut out = Frame::new();
    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        for name in frame.column_names() {
            out.set_column(name, Vec::new())?;
        }
        return Ok(out);
    };

    let label_offset = match table.resample_label() {
        BucketLabel::Start => 0,
        BucketLabel::End => width,
    };
    let indexes: Vec<i64> = (first..=last).collect();
    let empty = Vec::new();

    for name in frame.column_names() {
        let values = frame.column(name).unwrap_or_default();
        let column: Vec<Value> = if name == time_column {
            indexes
                .iter()
                .map(|&i| {
                    DateTime::from_timestamp_millis(i * width + label_offset)
                        .map_or(Value::Null, Value::Time)
                })
                .collect()
        } else {
            let op = table.get_column(name).map(|c| c.resample_op());
            indexes
                .iter()
                .map(|i| {
                    let rows = buckets.get(i).unwrap_or(&empty);
                    let cells: Vec<&Value> = rows.iter().map(|&r| &values[r]).collect();
                    match op {
                        Some(op) => aggregate(op, &cells),
                        None => aggregate(ResampleOp::First, &cells),
                    }
                })
                .collect()
        };
        out.set_column(name, column)?;
    }
    Ok(out)
}

/// Aggregates one bucket's values. `Null`s are ignored; an empty bucket
/// counts as zero and yields `Null` for every other operator.
#[must_use]
pub fn aggregate(op: ResampleOp, values: &[&Value]) -> Value {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    match op {
        ResampleOp::Count => Value::Int(i64::try_from(present.len()).unwrap_or(i64::MAX)),
        ResampleOp::First => present.first().map_or(Value::Null, |v| (*v).clone()),
        ResampleOp::Last => present.last().map_or(Value::Null, |v| (*v).clone()),
        ResampleOp::Min => extreme(&present, std::cmp::Ordering::Less),
        ResampleOp::Max => extreme(&present, std::cmp::Ordering::Greater),
        ResampleOp::Sum => sum(&present),
        ResampleOp::Mean => mean(&present),
    }
}

fn extreme(values: &[&Value], want: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &value in values {
        best = match best {
            Some(current) if value.compare(current) != Some(want) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or_default()
}

fn sum(values: &[&Value]) -> Value {
    let Some(first) = values.first() else {
        return Value::Null;
    };
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let exact = values.iter().try_fold(0i64, |acc, v| match v {
            Value::Int(n) => acc.checked_add(*n),
            _ => None,
        });
        if let Some(total) = exact {
            return Value::Int(total);
        }
    }
    if values.iter().all(|v| v.as_f64().is_some()) {
        return Value::Float(values.iter().filter_map(|v| v.as_f64()).sum());
    }
    (*first).clone()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[&Value]) -> Value {
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.is_empty() {
        return Value::Null;
    }
    Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use netportal_core::TableId;

    use super::*;
    use crate::table::Column;

    fn at(minute: u32, second: u32) -> Value {
        Value::Time(Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, second).unwrap())
    }

    fn table() -> Table {
        Table::new(TableId::new(1), "t", "x")
            .column(Column::time("time"))
            .column(Column::new("bytes"))
            .column(Column::new("peak").resample(ResampleOp::Max))
            .column(Column::new("samples").resample(ResampleOp::Count))
            .resampled()
    }

    fn frame() -> Frame {
        Frame::from_rows(
            &["time", "bytes", "peak", "samples"],
            vec![
                vec![at(0, 0), Value::Int(1), Value::Int(5), Value::Int(1)],
                vec![at(0, 30), Value::Int(2), Value::Int(9), Value::Int(1)],
                vec![at(2, 10), Value::Int(4), Value::Int(3), Value::Int(1)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn buckets_are_contiguous_and_end_labelled() {
        let out = resample(&table(), &frame(), Duration::minutes(1)).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.column("time").unwrap(), &[at(1, 0), at(2, 0), at(3, 0)]);
        assert_eq!(
            out.column("bytes").unwrap(),
            &[Value::Int(3), Value::Null, Value::Int(4)]
        );
        assert_eq!(
            out.column("peak").unwrap(),
            &[Value::Int(9), Value::Null, Value::Int(3)]
        );
        assert_eq!(
            out.column("samples").unwrap(),
            &[Value::Int(2), Value::Int(0), Value::Int(1)]
        );
    }

    #[test]
    fn start_labels() {
        let table = table().bucket_label(BucketLabel::Start);
        let out = resample(&table, &frame(), Duration::minutes(5)).unwrap();
        assert_eq!(out.column("time").unwrap(), &[at(0, 0)]);
        assert_eq!(out.column("bytes").unwrap(), &[Value::Int(7)]);
    }

    #[test]
    fn sub_second_resolution_is_rejected() {
        let err = resample(&table(), &frame(), Duration::milliseconds(500)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn empty_input_keeps_columns() {
        let empty = Frame::from_rows(&["time", "bytes"], Vec::new()).unwrap();
        let out = resample(&table(), &empty, Duration::minutes(1)).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.column_names(), vec!["time", "bytes"]);
    }

    #[test]
    fn aggregates() {
        let values = [Value::Int(2), Value::Null, Value::Float(4.0)];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(aggregate(ResampleOp::Sum, &refs), Value::Float(6.0));
        assert_eq!(aggregate(ResampleOp::Mean, &refs), Value::Float(3.0));
        assert_eq!(aggregate(ResampleOp::Min, &refs), Value::Int(2));
        assert_eq!(aggregate(ResampleOp::Max, &refs), Value::Float(4.0));
        assert_eq!(aggregate(ResampleOp::Count, &refs), Value::Int(2));
        assert_eq!(aggregate(ResampleOp::First, &refs), Value::Int(2));
        assert_eq!(aggregate(ResampleOp::Last, &refs), Value::Float(4.0));
        assert_eq!(aggregate(ResampleOp::Sum, &[]), Value::Null);
    }
}
