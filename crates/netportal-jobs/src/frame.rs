//! Column-oriented tabular results.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// A named column of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Column name.
    pub name: String,
    /// One value per row.
    pub values: Vec<Value>,
}

/// A table of values stored column by column.
///
/// Every series has the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    series: Vec<Series>,
    len: usize,
}

impl Frame {
    /// Creates an empty frame with no columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a frame from rows aligned to `columns`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] if a row has the wrong number of values.
    pub fn from_rows<S: AsRef<str>>(columns: &[S], rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut series: Vec<Series> = columns
            .iter()
            .map(|name| Series {
                name: name.as_ref().to_string(),
                values: Vec::with_capacity(rows.len()),
            })
            .collect();
        let len = rows.len();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != series.len() {
                return Err(Error::Executor {
                    message: format!(
                        "row {i} has {} values but {} columns are expected",
                        row.len(),
                        series.len()
                    ),
                });
            }
            for (s, value) in series.iter_mut().zip(row) {
                s.values.push(value);
            }
        }
        Ok(Self { series, len })
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the frame has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the values of a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.series
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.values.as_slice())
    }

    /// Returns a mutable reference to a column's values.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        self.series
            .iter_mut()
            .find(|s| s.name == name)
            .map(|s| &mut s.values)
    }

    /// Returns true if the frame has a column called `name`.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.series.iter().any(|s| s.name == name)
    }

    /// Adds or replaces a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] if the length differs from the frame's.
    /// A frame without columns adopts the length of its first column.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        let name = name.into();
        if !self.series.is_empty() && values.len() != self.len {
            return Err(Error::Executor {
                message: format!(
                    "column '{name}' has {} values but the frame has {} rows",
                    values.len(),
                    self.len
                ),
            });
        }
        if self.series.is_empty() {
            self.len = values.len();
        }
        match self.series.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.values = values,
            None => self.series.push(Series { name, values }),
        }
        Ok(())
    }

    /// Returns the value at `row` of column `name`.
    #[must_use]
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|values| values.get(row))
    }

    /// Returns the rows with values ordered as `columns`; absent columns
    /// yield `Null`.
    #[must_use]
    pub fn rows_for<S: AsRef<str>>(&self, columns: &[S]) -> Vec<Vec<Value>> {
        let selected: Vec<Option<&Series>> = columns
            .iter()
            .map(|c| self.series.iter().find(|s| s.name == c.as_ref()))
            .collect();
        (0..self.len)
            .map(|i| {
                selected
                    .iter()
                    .map(|s| {
                        s.and_then(|s| s.values.get(i))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            })
            .collect()
    }

    /// Returns all rows in column order.
    #[must_use]
    pub fn rows(&self) -> Vec<Vec<Value>> {
        let names = self.column_names();
        self.rows_for(&names)
    }

    /// Sorts rows by `column` in descending order, nulls last.
    ///
    /// Rows with incomparable values keep their relative order.
    pub fn sort_desc_nulls_last(&mut self, column: &str) {
        let Some(keys) = self.column(column).map(<[Value]>::to_vec) else {
            return;
        };
        let mut order: Vec<usize> = (0..self.len).collect();
        order.sort_by(|&a, &b| {
            let (va, vb) = (&keys[a], &keys[b]);
            match (is_missing(va), is_missing(vb)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => vb.compare(va).unwrap_or(Ordering::Equal),
            }
        });
        for s in &mut self.series {
            let mut reordered = Vec::with_capacity(s.values.len());
            for &i in &order {
                reordered.push(std::mem::take(&mut s.values[i]));
            }
            s.values = reordered;
        }
    }

    /// Keeps at most `rows` rows.
    pub fn truncate(&mut self, rows: usize) {
        if rows < self.len {
            for s in &mut self.series {
                s.values.truncate(rows);
            }
            self.len = rows;
        }
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Float(f) => f.is_nan(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_rows(
            &["host", "bytes"],
            vec![
                vec![Value::from("a"), Value::Int(10)],
                vec![Value::from("b"), Value::Null],
                vec![Value::from("c"), Value::Float(30.5)],
                vec![Value::from("d"), Value::Int(20)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_rows_checks_width() {
        let err = Frame::from_rows(&["a", "b"], vec![vec![Value::Int(1)]]).unwrap_err();
        assert!(err.to_string().contains("row 0"));
    }

    #[test]
    fn sort_desc_puts_nulls_last() {
        let mut f = frame();
        f.sort_desc_nulls_last("bytes");
        let hosts: Vec<String> = f
            .column("host")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(hosts, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn truncate_limits_rows() {
        let mut f = frame();
        f.truncate(2);
        assert_eq!(f.len(), 2);
        assert_eq!(f.column("bytes").unwrap().len(), 2);
        f.truncate(10);
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn rows_for_fills_missing_columns() {
        let f = frame();
        let rows = f.rows_for(&["bytes", "absent"]);
        assert_eq!(rows[0], vec![Value::Int(10), Value::Null]);
    }

    #[test]
    fn set_column_checks_length() {
        let mut f = frame();
        assert!(f.set_column("x", vec![Value::Null]).is_err());
        f.set_column("x", vec![Value::Int(1); 4]).unwrap();
        assert_eq!(f.column_names(), vec!["host", "bytes", "x"]);
    }
}
