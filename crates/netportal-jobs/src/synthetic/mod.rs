//! Synthetic column computation.
//!
//! Runs in three phases over a coerced result:
//!
//! 1. synthetic columns computed before resampling, in table order;
//! 2. resampling, when the table asks for it;
//! 3. synthetic columns flagged to compute after resampling.
//!
//! A later synthetic column may reference an earlier one.

pub mod expr;
pub mod resample;

use chrono::Duration;
use tracing::debug;

use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::table::Table;

use self::expr::Expr;

/// Criteria key for the resample bucket width.
pub const RESAMPLE_RESOLUTION: &str = "resample_resolution";

/// Criteria key for the data resolution, used when no resample width is set.
pub const RESOLUTION: &str = "resolution";

/// Returns the resample bucket width named by `criteria`.
#[must_use]
pub fn resample_resolution(criteria: &Criteria) -> Option<Duration> {
    criteria
        .duration_of(RESAMPLE_RESOLUTION)
        .or_else(|| criteria.duration_of(RESOLUTION))
}

/// Checks that a resampled table can run with `criteria`.
///
/// Tables that do not resample always pass.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the table has no time column, the
/// criteria name no resolution, or the resolution is below one second.
pub fn check_resample(table: &Table, criteria: &Criteria) -> Result<()> {
    if !table.is_resampled() {
        return Ok(());
    }
    if table.time_column().is_none() {
        return Err(Error::configuration(format!(
            "table '{}' is resampled but has no time column",
            table.name()
        )));
    }
    let resolution = resample_resolution(criteria).ok_or_else(|| {
        Error::configuration(format!(
            "table '{}' is resampled but no '{RESOLUTION}' criterion was given",
            table.name()
        ))
    })?;
    if resolution.num_milliseconds() < resample::MIN_RESOLUTION_MS {
        return Err(Error::configuration(format!(
            "table '{}' resample resolution must be at least 1s",
            table.name()
        )));
    }
    Ok(())
}

/// Adds synthetic columns to `frame` and resamples it as the table asks.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for an invalid compute expression or
/// unmet resampling preconditions.
pub fn compute_synthetic(table: &Table, criteria: &Criteria, mut frame: Frame) -> Result<Frame> {
    let names = table.column_names();
    let mut pre = Vec::new();
    let mut post = Vec::new();
    for column in table.columns() {
        let Some(source) = column.compute_expression() else {
            continue;
        };
        let expr = Expr::parse(source, &names).map_err(|e| {
            Error::configuration(format!(
                "table '{}' column '{}': {e}",
                table.name(),
                column.name()
            ))
        })?;
        if column.is_post_resample() {
            post.push((column.name(), expr));
        } else {
            pre.push((column.name(), expr));
        }
    }

    apply(&mut frame, &pre)?;

    if table.is_resampled() {
        check_resample(table, criteria)?;
        if let Some(resolution) = resample_resolution(criteria) {
            let before = frame.len();
            frame = resample::resample(table, &frame, resolution)?;
            debug!(
                table = table.name(),
                rows_in = before,
                rows_out = frame.len(),
                "resampled result"
            );
        }
    }

    apply(&mut frame, &post)?;
    Ok(frame)
}

fn apply(frame: &mut Frame, columns: &[(&str, Expr)]) -> Result<()> {
    for (name, expr) in columns {
        let values = expr.evaluate(frame);
        frame.set_column(*name, values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use netportal_core::TableId;

    use super::*;
    use crate::table::{Column, ResampleOp};
    use crate::value::Value;

    fn at(minute: u32) -> Value {
        Value::Time(Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap())
    }

    fn table() -> Table {
        Table::new(TableId::new(1), "t", "x")
            .column(Column::time("time"))
            .column(Column::new("bytes"))
            .column(Column::new("kbytes").synthetic("{bytes} / 1000"))
            .column(Column::new("rows").synthetic("1").resample(ResampleOp::Sum))
            .column(
                Column::new("avg")
                    .synthetic("{bytes} / {rows}")
                    .post_resample(),
            )
    }

    fn frame() -> Frame {
        Frame::from_rows(
            &["time", "bytes"],
            vec![
                vec![at(0), Value::Int(1000)],
                vec![at(1), Value::Int(3000)],
                vec![at(5), Value::Int(500)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn computes_without_resampling() {
        let out = compute_synthetic(&table(), &Criteria::new(), frame()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get(1, "kbytes"), Some(&Value::Float(3.0)));
        assert_eq!(out.get(1, "avg"), Some(&Value::Float(3000.0)));
    }

    #[test]
    fn resamples_between_phases() {
        let table = table().resampled();
        let criteria = Criteria::new().with(RESOLUTION, "5min");
        let out = compute_synthetic(&table, &criteria, frame()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.get(0, "bytes"), Some(&Value::Int(4000)));
        assert_eq!(out.get(0, "rows"), Some(&Value::Int(2)));
        assert_eq!(out.get(0, "avg"), Some(&Value::Float(2000.0)));
        assert_eq!(out.get(1, "avg"), Some(&Value::Float(500.0)));
    }

    #[test]
    fn resample_width_prefers_resample_resolution() {
        let criteria = Criteria::new()
            .with(RESOLUTION, "1min")
            .with(RESAMPLE_RESOLUTION, "1h");
        assert_eq!(resample_resolution(&criteria), Some(Duration::hours(1)));
    }

    #[test]
    fn resampling_preconditions() {
        let table = table().resampled();
        let missing = check_resample(&table, &Criteria::new()).unwrap_err();
        assert!(missing.to_string().contains("resolution"));

        let tiny = Criteria::new().with(RESOLUTION, Value::Duration(Duration::milliseconds(10)));
        assert!(check_resample(&table, &tiny).is_err());

        let no_time = Table::new(TableId::new(2), "n", "x")
            .column(Column::new("bytes"))
            .resampled();
        assert!(check_resample(&no_time, &Criteria::new().with(RESOLUTION, 60)).is_err());

        assert!(check_resample(&Table::new(TableId::new(3), "p", "x"), &Criteria::new()).is_ok());
    }
}
