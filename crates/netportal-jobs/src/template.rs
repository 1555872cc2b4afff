//! `{keyword}` templates used to derive field values from other fields.
//!
//! `{{` and `}}` produce literal braces. Anything else inside braces must
//! be a keyword present in the criteria at render time.

use crate::criteria::Criteria;

/// A parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Keyword(String),
}

/// A keyword substitution template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
}

impl Template {
    /// Wraps a template source string.
    ///
    /// Syntax is checked when rendering, so a malformed template surfaces
    /// as a template error during resolution.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Returns the template source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the keywords referenced by the template, in first-use order.
    ///
    /// Malformed trailing text is ignored.
    #[must_use]
    pub fn keywords(&self) -> Vec<String> {
        let segments = match parse(&self.source) {
            Ok(segments) => segments,
            Err((partial, _)) => partial,
        };
        let mut out: Vec<String> = Vec::new();
        for segment in segments {
            if let Segment::Keyword(kw) = segment {
                if !out.contains(&kw) {
                    out.push(kw);
                }
            }
        }
        out
    }

    /// Substitutes every `{keyword}` with its criteria value.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure for malformed templates or
    /// keywords missing from `criteria`.
    pub fn render(&self, criteria: &Criteria) -> Result<String, String> {
        let segments = parse(&self.source).map_err(|(_, message)| message)?;
        let mut out = String::with_capacity(self.source.len());
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Keyword(kw) => {
                    let value = criteria
                        .get(&kw)
                        .ok_or_else(|| format!("missing keyword '{kw}'"))?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

/// Splits a template into segments.
///
/// On error, returns the segments parsed so far alongside the message.
fn parse(source: &str) -> Result<Vec<Segment>, (Vec<Segment>, String)> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let name = name.trim().to_string();
                if !closed {
                    return Err((segments, "unterminated '{' in template".to_string()));
                }
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err((segments, format!("invalid keyword '{{{name}}}' in template")));
                }
                segments.push(Segment::Keyword(name));
            }
            '}' => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                return Err((segments, "single '}' encountered in template".to_string()));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
