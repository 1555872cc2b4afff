//! Table and column definitions.
//!
//! Tables are built when reports are configured and are read-only while
//! jobs run. A table names the query executor capability that produces
//! its rows, its columns (sourced or synthetic), the fields it accepts
//! and how its results may be cached and resampled.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use netportal_core::TableId;
use serde::{Deserialize, Serialize};

use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::synthetic::expr::Expr;
use crate::value::Value;

/// Datatype tag of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// No particular interpretation.
    #[default]
    Unspecified,
    /// Timestamps; values are normalised to UTC times.
    Time,
    /// Byte counts.
    Bytes,
    /// Generic measurements.
    Metric,
    /// Free text.
    Text,
}

/// How a column is aggregated when rows are resampled into time buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleOp {
    /// Sum of values.
    #[default]
    Sum,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Arithmetic mean.
    Mean,
    /// Number of non-null values.
    Count,
    /// First non-null value.
    First,
    /// Last non-null value.
    Last,
}

impl ResampleOp {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

impl fmt::Display for ResampleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResampleOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean" | "avg" => Ok(Self::Mean),
            "count" => Ok(Self::Count),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(Error::configuration(format!(
                "unknown resample operation '{other}'"
            ))),
        }
    }
}

/// Which edge of a resample bucket labels its timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketLabel {
    /// Label buckets with their start time.
    Start,
    /// Label buckets with their end time.
    #[default]
    End,
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    label: String,
    is_key: bool,
    is_numeric: bool,
    ephemeral: bool,
    datatype: DataType,
    compute_expression: Option<String>,
    compute_post_resample: bool,
    resample_op: ResampleOp,
}

impl Column {
    /// Creates a numeric, non-key, sourced column.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            is_key: false,
            is_numeric: true,
            ephemeral: false,
            datatype: DataType::Unspecified,
            compute_expression: None,
            compute_post_resample: false,
            resample_op: ResampleOp::Sum,
        }
    }

    /// Creates a key column of time datatype.
    #[must_use]
    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name).key().datatype(DataType::Time)
    }

    /// Sets the display label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Marks the column as part of the row key. Key columns are not numeric.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.is_numeric = false;
        self
    }

    /// Marks the column as non-numeric.
    #[must_use]
    pub fn text(mut self) -> Self {
        self.is_numeric = false;
        self.datatype = DataType::Text;
        self
    }

    /// Marks the column as added at run time, excluded from cache keys.
    #[must_use]
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Sets the datatype tag.
    #[must_use]
    pub fn datatype(mut self, datatype: DataType) -> Self {
        self.datatype = datatype;
        self
    }

    /// Makes the column synthetic, computed from `expression`.
    #[must_use]
    pub fn synthetic(mut self, expression: impl Into<String>) -> Self {
        self.compute_expression = Some(expression.into());
        self
    }

    /// Computes the synthetic value after resampling instead of before.
    #[must_use]
    pub fn post_resample(mut self) -> Self {
        self.compute_post_resample = true;
        self
    }

    /// Sets the resample aggregation.
    #[must_use]
    pub fn resample(mut self, op: ResampleOp) -> Self {
        self.resample_op = op;
        self
    }

    /// Returns the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the display label.
    #[must_use]
    pub fn label_text(&self) -> &str {
        &self.label
    }

    /// Returns true for key columns.
    #[must_use]
    pub fn is_key(&self) -> bool {
        self.is_key
    }

    /// Returns true for numeric columns.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.is_numeric
    }

    /// Returns true for synthetic columns.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.compute_expression.is_some()
    }

    /// Returns true for ephemeral columns.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Returns the datatype tag.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.datatype
    }

    /// Returns the compute expression of a synthetic column.
    #[must_use]
    pub fn compute_expression(&self) -> Option<&str> {
        self.compute_expression.as_deref()
    }

    /// Returns true if the synthetic value is computed after resampling.
    #[must_use]
    pub fn is_post_resample(&self) -> bool {
        self.compute_post_resample
    }

    /// Returns the resample aggregation.
    #[must_use]
    pub fn resample_op(&self) -> ResampleOp {
        self.resample_op
    }
}

/// Normalises criteria before hashing; may drop volatile keys.
pub type CriteriaHandleFn = dyn Fn(&Criteria) -> Criteria + Send + Sync;

/// A table definition.
#[derive(Clone)]
pub struct Table {
    id: TableId,
    name: String,
    executor: String,
    columns: Vec<Column>,
    sort_column: Option<String>,
    fields: Vec<Field>,
    cacheable: bool,
    resample: bool,
    bucket_label: BucketLabel,
    row_limit: Option<usize>,
    options: BTreeMap<String, Value>,
    criteria_defaults: BTreeMap<String, Value>,
    criteria_handle_fn: Option<Arc<CriteriaHandleFn>>,
}

impl Table {
    /// Creates a cacheable table run by the executor registered as `executor`.
    #[must_use]
    pub fn new(id: TableId, name: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            executor: executor.into(),
            columns: Vec::new(),
            sort_column: None,
            fields: Vec::new(),
            cacheable: true,
            resample: false,
            bucket_label: BucketLabel::End,
            row_limit: None,
            options: BTreeMap::new(),
            criteria_defaults: BTreeMap::new(),
            criteria_handle_fn: None,
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Designates the column results are sorted by (descending).
    #[must_use]
    pub fn sort_by(mut self, column: impl Into<String>) -> Self {
        self.sort_column = Some(column.into());
        self
    }

    /// Disables cache reuse for this table.
    #[must_use]
    pub fn not_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Enables resampling of results into time buckets.
    #[must_use]
    pub fn resampled(mut self) -> Self {
        self.resample = true;
        self
    }

    /// Selects which bucket edge labels resampled rows.
    #[must_use]
    pub fn bucket_label(mut self, label: BucketLabel) -> Self {
        self.bucket_label = label;
        self
    }

    /// Limits the number of rows returned.
    #[must_use]
    pub fn row_limit(mut self, rows: usize) -> Self {
        self.row_limit = Some(rows);
        self
    }

    /// Sets a free-form option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets a default criteria value used by [`Criteria::build_for_table`].
    #[must_use]
    pub fn criteria_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria_defaults.insert(key.into(), value.into());
        self
    }

    /// Installs a hook that normalises criteria before hashing.
    #[must_use]
    pub fn criteria_handle_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Criteria) -> Criteria + Send + Sync + 'static,
    {
        self.criteria_handle_fn = Some(Arc::new(f));
        self
    }

    /// Returns the table ID.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the executor capability ID.
    #[must_use]
    pub fn executor(&self) -> &str {
        &self.executor
    }

    /// Returns all columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Returns the names of all columns.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    /// Returns the names of columns an executor must supply, in order.
    #[must_use]
    pub fn source_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.is_synthetic())
            .map(Column::name)
            .collect()
    }

    /// Returns the names of columns that participate in the cache key.
    #[must_use]
    pub fn cache_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.is_ephemeral())
            .map(Column::name)
            .collect()
    }

    /// Returns the first time-typed column.
    #[must_use]
    pub fn time_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.data_type() == DataType::Time)
    }

    /// Returns the sort column name.
    #[must_use]
    pub fn sort_column(&self) -> Option<&str> {
        self.sort_column.as_deref()
    }

    /// Returns the fields accepted by the table.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns true if jobs for this table may be shared through the cache.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Returns true if results are resampled.
    #[must_use]
    pub fn is_resampled(&self) -> bool {
        self.resample
    }

    /// Returns the bucket label convention.
    #[must_use]
    pub fn resample_label(&self) -> BucketLabel {
        self.bucket_label
    }

    /// Returns the row limit.
    #[must_use]
    pub fn rows(&self) -> Option<usize> {
        self.row_limit
    }

    /// Returns a free-form option.
    #[must_use]
    pub fn get_option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Returns the default criteria.
    #[must_use]
    pub fn criteria_defaults(&self) -> &BTreeMap<String, Value> {
        &self.criteria_defaults
    }

    /// Applies the criteria handle hook, if any.
    #[must_use]
    pub fn handle_criteria(&self, criteria: &Criteria) -> Criteria {
        self.criteria_handle_fn
            .as_ref()
            .map_or_else(|| criteria.clone(), |f| f(criteria))
    }

    /// Checks the table's column configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for duplicate column names, invalid
    /// compute expressions, references to undeclared columns, or resampling
    /// without a time column.
    pub fn validate(&self) -> Result<()> {
        let names = self.column_names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::configuration(format!(
                    "table '{}' declares column '{name}' twice",
                    self.name
                )));
            }
        }
        for column in &self.columns {
            if let Some(source) = column.compute_expression() {
                Expr::parse(source, &names).map_err(|e| {
                    Error::configuration(format!(
                        "table '{}' column '{}': {e}",
                        self.name,
                        column.name()
                    ))
                })?;
            }
        }
        if self.resample && self.time_column().is_none() {
            return Err(Error::configuration(format!(
                "table '{}' is resampled but has no time column",
                self.name
            )));
        }
        if let Some(sort) = &self.sort_column {
            if self.get_column(sort).is_none() {
                return Err(Error::configuration(format!(
                    "table '{}' sorts by unknown column '{sort}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("executor", &self.executor)
            .field("columns", &self.columns)
            .field("cacheable", &self.cacheable)
            .field("resample", &self.resample)
            .finish_non_exhaustive()
    }
}
