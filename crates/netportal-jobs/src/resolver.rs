//! Field dependency resolution.
//!
//! The [`Resolver`] orders a set of fields so that every field follows its
//! parents, then builds [`Criteria`] from supplied values, initial values,
//! templates and post-process hooks.
//!
//! Ordering walks a queue of pending fields: a field whose parents are all
//! ordered is appended, anything else goes back to the tail. The first
//! field sent back since the last bit of progress is remembered; meeting it
//! again without progress means the remaining fields can never be ordered.

use std::collections::{BTreeMap, HashSet, VecDeque};

use tracing::debug;

use crate::criteria::Criteria;
use crate::dag::Dag;
use crate::error::{Error, Result};
use crate::field::{Field, FieldKind, FieldOptions, Resolution};
use crate::value::Value;

/// Raw keyword/value pairs as submitted by a caller.
pub type RawValues = BTreeMap<String, Value>;

/// Orders and resolves a scope of fields.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    fields: Vec<Field>,
}

impl Resolver {
    /// Creates a resolver over `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateField`] if two fields share a keyword.
    pub fn new<I: IntoIterator<Item = Field>>(fields: I) -> Result<Self> {
        let fields: Vec<Field> = fields.into_iter().collect();
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.keyword()) {
                return Err(Error::DuplicateField {
                    keyword: field.keyword().to_string(),
                });
            }
        }
        Ok(Self { fields })
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by keyword.
    #[must_use]
    pub fn field(&self, keyword: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.keyword() == keyword)
    }

    /// Returns the field keywords ordered so that parents come first.
    ///
    /// Fields without dependencies keep their declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownParent`] for a parent outside the scope and
    /// [`Error::CircularDependency`] when the parents form a cycle.
    pub fn order(&self) -> Result<Vec<String>> {
        let scope: HashSet<&str> = self.fields.iter().map(Field::keyword).collect();
        for field in &self.fields {
            if let Some(parent) = field
                .parent_keywords()
                .iter()
                .find(|p| !scope.contains(p.as_str()))
            {
                return Err(Error::UnknownParent {
                    keyword: field.keyword().to_string(),
                    parent: parent.clone(),
                });
            }
        }

        let mut queue: VecDeque<&Field> = self.fields.iter().collect();
        let mut ordered: Vec<String> = Vec::with_capacity(self.fields.len());
        let mut done: HashSet<&str> = HashSet::with_capacity(self.fields.len());
        let mut last_not_ready: Option<&str> = None;

        while let Some(field) = queue.pop_front() {
            let ready = field
                .parent_keywords()
                .iter()
                .all(|p| done.contains(p.as_str()));
            if ready {
                done.insert(field.keyword());
                ordered.push(field.keyword().to_string());
                last_not_ready = None;
                continue;
            }

            if last_not_ready == Some(field.keyword()) {
                queue.push_front(field);
                return Err(circular(&queue));
            }
            if last_not_ready.is_none() {
                last_not_ready = Some(field.keyword());
            }
            queue.push_back(field);
        }

        Ok(ordered)
    }

    /// Runs every pre-process hook against the values known so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreProcess`] if a hook fails.
    pub fn prepare(&self, known: &Criteria) -> Result<BTreeMap<String, FieldOptions>> {
        self.run_pre_process(known, |_| true)
    }

    /// Re-runs the pre-process hooks of dynamic fields that depend on
    /// `changed`, e.g. after a user edits that field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreProcess`] if a hook fails.
    pub fn refresh_dynamic(
        &self,
        changed: &str,
        known: &Criteria,
    ) -> Result<BTreeMap<String, FieldOptions>> {
        self.run_pre_process(known, |field| {
            field.is_dynamic() && field.parent_keywords().iter().any(|p| p == changed)
        })
    }

    fn run_pre_process(
        &self,
        known: &Criteria,
        include: impl Fn(&Field) -> bool,
    ) -> Result<BTreeMap<String, FieldOptions>> {
        let mut out = BTreeMap::new();
        for field in self.fields.iter().filter(|f| include(f)) {
            let Some(hook) = field.pre_process_hook() else {
                continue;
            };
            let mut options = FieldOptions::default();
            hook.call(field, known, &mut options)
                .map_err(|e| Error::PreProcess {
                    keyword: field.keyword().to_string(),
                    hook: hook.name().to_string(),
                    message: format!("{e:#}"),
                })?;
            out.insert(field.keyword().to_string(), options);
        }
        Ok(out)
    }

    /// Resolves supplied values into criteria.
    ///
    /// Supplied keys that are not fields (such as `ignore_cache`) pass
    /// through unchanged. Hidden fields always take their initial value.
    ///
    /// # Errors
    ///
    /// Returns a resolution, template or post-process error; see
    /// [`crate::error::ErrorKind`].
    pub fn resolve(&self, supplied: &RawValues) -> Result<Criteria> {
        let order = self.order()?;
        let mut criteria = Criteria::new();

        for (key, value) in supplied {
            if self.field(key).is_none() {
                criteria.set(key.clone(), value.clone());
            }
        }

        for field in &self.fields {
            bind_input(field, supplied, &mut criteria)?;
        }

        let options = self.prepare(&criteria)?;
        for field in &self.fields {
            check_choice(field, options.get(field.keyword()), &criteria)?;
        }

        for keyword in &order {
            let Some(field) = self.field(keyword) else {
                continue;
            };
            derive(field, &mut criteria)?;
        }

        debug!(fields = order.len(), "resolved criteria");
        Ok(criteria)
    }
}

fn bind_input(field: &Field, supplied: &RawValues, criteria: &mut Criteria) -> Result<()> {
    let keyword = field.keyword();
    let raw = if field.is_hidden() {
        field.initial_value()
    } else {
        supplied
            .get(keyword)
            .filter(|v| !is_blank(v))
            .or_else(|| field.initial_value())
    };

    let value = match raw {
        Some(raw) => field
            .field_kind()
            .parse(raw)
            .map_err(|message| Error::InvalidValue {
                keyword: keyword.to_string(),
                message,
            })?,
        None => Value::Null,
    };

    if !value.is_null() {
        criteria.set(keyword, value);
    } else if field.resolution().is_none() {
        if field.is_required() {
            return Err(Error::MissingValue {
                keyword: keyword.to_string(),
            });
        }
        if !field.parent_keywords().is_empty() {
            return Err(Error::NoResolutionMethod {
                keyword: keyword.to_string(),
            });
        }
        criteria.set(keyword, Value::Null);
    }
    Ok(())
}

fn derive(field: &Field, criteria: &mut Criteria) -> Result<()> {
    let keyword = field.keyword();
    match field.resolution() {
        Some(Resolution::Template(template)) => {
            let template_error = |message: String| Error::Template {
                keyword: keyword.to_string(),
                template: template.source().to_string(),
                message,
            };
            let rendered = template.render(criteria).map_err(template_error)?;
            let value = field
                .field_kind()
                .parse(&Value::Str(rendered))
                .map_err(template_error)?;
            criteria.set(keyword, value);
        }
        Some(Resolution::PostProcess(hook)) => {
            criteria.remove(keyword);
            hook.call(field, criteria)
                .map_err(|e| Error::PostProcess {
                    keyword: keyword.to_string(),
                    hook: hook.name().to_string(),
                    message: format!("{e:#}"),
                })?;
            if !criteria.contains(keyword) {
                return Err(Error::PostProcess {
                    keyword: keyword.to_string(),
                    hook: hook.name().to_string(),
                    message: "hook did not set the field's keyword".into(),
                });
            }
        }
        None => {}
    }
    Ok(())
}

fn check_choice(field: &Field, options: Option<&FieldOptions>, criteria: &Criteria) -> Result<()> {
    let FieldKind::Choice(declared) = field.field_kind() else {
        return Ok(());
    };
    let choices = options
        .and_then(|o| o.choices.as_ref())
        .unwrap_or(declared);
    if choices.is_empty() {
        return Ok(());
    }
    match criteria.get(field.keyword()) {
        Some(Value::Str(s)) if !choices.contains(s) => Err(Error::InvalidValue {
            keyword: field.keyword().to_string(),
            message: format!("'{s}' is not one of {choices:?}"),
        }),
        _ => Ok(()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Str(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn circular(remaining: &VecDeque<&Field>) -> Error {
    let fields: Vec<String> = remaining.iter().map(|f| f.keyword().to_string()).collect();

    let mut dag: Dag<String> = Dag::new();
    for field in remaining {
        dag.add_node(field.keyword().to_string());
    }
    for field in remaining {
        let child = dag.add_node(field.keyword().to_string());
        for parent in field.parent_keywords() {
            if fields.contains(parent) {
                let parent = dag.add_node(parent.clone());
                dag.add_edge(parent, child);
            }
        }
    }

    Error::CircularDependency {
        cycle: dag.cycle_members(),
        fields,
    }
}
