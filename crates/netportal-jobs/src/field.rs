//! Declarative criteria fields.
//!
//! A [`Field`] describes one keyword a table or report accepts: how raw
//! input is parsed, its default, which other keywords it depends on and,
//! for derived fields, how its value is computed (a [`Template`] or a
//! post-process hook). Fields are built once when a table is defined and
//! never mutated afterwards; run-time values live in [`Criteria`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::criteria::Criteria;
use crate::template::Template;
use crate::value::{parse_datetime, parse_duration, Value};

/// Fixed parameters handed to a hook on every invocation.
pub type Params = BTreeMap<String, Value>;

/// Output bag populated by pre-process hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOptions {
    /// Allowed values for a choice field, overriding the declared list.
    pub choices: Option<Vec<String>>,
    /// Initial value to present, overriding the declared initial.
    pub initial: Option<Value>,
    /// Any other presentation hints.
    pub extra: BTreeMap<String, Value>,
}

/// Signature of a pre-process hook: `(field, known criteria, out, params)`.
pub type PreProcessFn =
    dyn Fn(&Field, &Criteria, &mut FieldOptions, &Params) -> anyhow::Result<()> + Send + Sync;

/// Signature of a post-process hook: `(field, criteria in/out, params)`.
///
/// The hook must set `criteria[field.keyword]`.
pub type PostProcessFn = dyn Fn(&Field, &mut Criteria, &Params) -> anyhow::Result<()> + Send + Sync;

/// A named hook function with its fixed parameters.
pub struct Hook<F: ?Sized> {
    name: String,
    func: Arc<F>,
    params: Params,
}

/// A pre-process hook.
pub type PreProcessHook = Hook<PreProcessFn>;

/// A post-process hook.
pub type PostProcessHook = Hook<PostProcessFn>;

impl<F: ?Sized> Hook<F> {
    /// Returns the hook name used in error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fixed parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Replaces the fixed parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Adds one fixed parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl PreProcessHook {
    /// Creates a pre-process hook.
    pub fn new<G>(name: impl Into<String>, func: G) -> Self
    where
        G: Fn(&Field, &Criteria, &mut FieldOptions, &Params) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            params: Params::new(),
        }
    }

    pub(crate) fn call(
        &self,
        field: &Field,
        known: &Criteria,
        out: &mut FieldOptions,
    ) -> anyhow::Result<()> {
        (self.func)(field, known, out, &self.params)
    }
}

impl PostProcessHook {
    /// Creates a post-process hook.
    pub fn new<G>(name: impl Into<String>, func: G) -> Self
    where
        G: Fn(&Field, &mut Criteria, &Params) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            params: Params::new(),
        }
    }

    pub(crate) fn call(&self, field: &Field, criteria: &mut Criteria) -> anyhow::Result<()> {
        (self.func)(field, criteria, &self.params)
    }
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
            params: self.params.clone(),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// How a derived field computes its value.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Keyword substitution against the criteria resolved so far.
    Template(Template),
    /// A hook that writes the field's keyword into the criteria.
    PostProcess(PostProcessHook),
}

/// The value type of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text.
    #[default]
    Text,
    /// Whole number.
    Integer,
    /// Real number.
    Float,
    /// Boolean flag.
    Boolean,
    /// Timestamp.
    DateTime,
    /// Time span such as `5 min`.
    Duration,
    /// One of a list of strings; an empty list defers to a pre-process hook.
    Choice(Vec<String>),
}

impl FieldKind {
    /// Parses raw input into a typed value. Blank strings become `Null`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the input does not fit.
    pub fn parse(&self, raw: &Value) -> Result<Value, String> {
        if let Value::Str(s) = raw {
            if s.trim().is_empty() && !matches!(self, Self::Text) {
                return Ok(Value::Null);
            }
        }
        if raw.is_null() {
            return Ok(Value::Null);
        }

        match (self, raw) {
            (Self::Text, Value::Str(_)) => Ok(raw.clone()),
            (Self::Text, other) => Ok(Value::Str(other.to_string())),

            (Self::Integer, Value::Int(_)) => Ok(raw.clone()),
            #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
            (Self::Integer, Value::Float(f)) if f.fract() == 0.0 => Ok(Value::Int(*f as i64)),
            (Self::Integer, Value::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{s}' is not a whole number")),

            (Self::Float, Value::Float(_)) => Ok(raw.clone()),
            (Self::Float, Value::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{s}' is not a number")),
            (Self::Float, other) => other
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("{} is not a number", other.type_name())),

            (Self::Boolean, Value::Bool(_)) => Ok(raw.clone()),
            (Self::Boolean, Value::Int(i)) => Ok(Value::Bool(*i != 0)),
            (Self::Boolean, Value::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "n" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },

            (Self::DateTime, Value::Time(_)) => Ok(raw.clone()),
            (Self::DateTime, Value::Str(s)) => parse_datetime(s).map(Value::Time),
            (Self::DateTime, Value::Int(_)) => raw
                .to_time()
                .map(Value::Time)
                .ok_or_else(|| "epoch seconds out of range".to_string()),

            (Self::Duration, Value::Duration(_)) => Ok(raw.clone()),
            (Self::Duration, Value::Str(s)) => parse_duration(s).map(Value::Duration),
            (Self::Duration, Value::Int(_) | Value::Float(_)) => raw
                .to_duration()
                .map(Value::Duration)
                .ok_or_else(|| "invalid duration".to_string()),

            (Self::Choice(_), Value::Str(_)) => Ok(raw.clone()),
            (Self::Choice(_), other) => Ok(Value::Str(other.to_string())),

            (kind, other) => Err(format!(
                "{} value cannot be used for a {kind:?} field",
                other.type_name()
            )),
        }
    }
}

/// A declarative criteria field.
#[derive(Debug, Clone)]
pub struct Field {
    keyword: String,
    label: String,
    help_text: Option<String>,
    initial: Option<Value>,
    required: bool,
    hidden: bool,
    kind: FieldKind,
    parents: Vec<String>,
    pre_process: Option<PreProcessHook>,
    resolution: Option<Resolution>,
    dynamic: bool,
}

impl Field {
    /// Creates an optional text field labelled with its keyword.
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        Self {
            label: keyword.clone(),
            keyword,
            help_text: None,
            initial: None,
            required: false,
            hidden: false,
            kind: FieldKind::Text,
            parents: Vec::new(),
            pre_process: None,
            resolution: None,
            dynamic: false,
        }
    }

    /// Sets the display label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the help text.
    #[must_use]
    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }

    /// Sets the initial (default) value.
    #[must_use]
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as hidden; hidden fields always use their initial value.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Sets the value type.
    #[must_use]
    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declares parent keywords that must resolve before this field.
    #[must_use]
    pub fn parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for parent in parents {
            self.push_parent(parent.into());
        }
        self
    }

    /// Attaches a pre-process hook.
    #[must_use]
    pub fn pre_process(mut self, hook: PreProcessHook) -> Self {
        self.pre_process = Some(hook);
        self
    }

    /// Marks the pre-process hook for re-evaluation when a parent changes.
    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Derives the value from a template; referenced keywords become parents.
    #[must_use]
    pub fn template(mut self, source: impl Into<String>) -> Self {
        let template = Template::new(source);
        for kw in template.keywords() {
            self.push_parent(kw);
        }
        self.resolution = Some(Resolution::Template(template));
        self
    }

    /// Derives the value from a post-process hook.
    #[must_use]
    pub fn post_process(mut self, hook: PostProcessHook) -> Self {
        self.resolution = Some(Resolution::PostProcess(hook));
        self
    }

    fn push_parent(&mut self, parent: String) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    /// Returns the keyword.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Returns the display label.
    #[must_use]
    pub fn label_text(&self) -> &str {
        &self.label
    }

    /// Returns the help text.
    #[must_use]
    pub fn help(&self) -> Option<&str> {
        self.help_text.as_deref()
    }

    /// Returns the declared initial value.
    #[must_use]
    pub fn initial_value(&self) -> Option<&Value> {
        self.initial.as_ref()
    }

    /// Returns true if the field is required.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns true if the field is hidden.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Returns true if the pre-process hook is re-run on parent changes.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Returns the value type.
    #[must_use]
    pub fn field_kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns the parent keywords, declared ones first.
    #[must_use]
    pub fn parent_keywords(&self) -> &[String] {
        &self.parents
    }

    /// Returns the pre-process hook.
    #[must_use]
    pub fn pre_process_hook(&self) -> Option<&PreProcessHook> {
        self.pre_process.as_ref()
    }

    /// Returns how the field derives its value, if it does.
    #[must_use]
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }
}
