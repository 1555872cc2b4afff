//! Dynamically typed values carried by criteria and result frames.
//!
//! Form submissions arrive as strings, query executors return whatever
//! their appliance produced, and synthetic columns compute new values;
//! [`Value`] is the common currency between them.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A single criteria or cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Str(String),
    /// UTC timestamp.
    Time(DateTime<Utc>),
    /// Time span, serialized as milliseconds.
    Duration(#[serde(with = "duration_ms")] Duration),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns a short name of the variant, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Time(_) => "time",
            Self::Duration(_) => "duration",
        }
    }

    /// Returns the numeric value of `Int`, `Float` and `Bool` values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Returns the text of a `Str` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a timestamp.
    ///
    /// Strings are parsed with [`parse_datetime`]; integers are epoch seconds.
    #[must_use]
    pub fn to_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            Self::Int(secs) => Utc.timestamp_opt(*secs, 0).single(),
            Self::Str(s) => parse_datetime(s).ok(),
            _ => None,
        }
    }

    /// Interprets the value as a duration.
    ///
    /// Strings are parsed with [`parse_duration`]; numbers are seconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            Self::Int(secs) => Some(Duration::seconds(*secs)),
            Self::Float(secs) => Some(Duration::milliseconds((secs * 1000.0).round() as i64)),
            Self::Str(s) => parse_duration(s).ok(),
            _ => None,
        }
    }

    /// Truthiness used for boolean criteria such as `ignore_cache`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "y" | "on"
            ),
            Self::Time(_) => true,
            Self::Duration(d) => !d.is_zero(),
        }
    }

    /// Orders two values of compatible types.
    ///
    /// Numbers compare numerically across `Int`/`Float`; mismatched types
    /// are unordered.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, ""),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Time(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Duration(d) => write!(f, "{}", format_duration(*d)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Formats a duration compactly, e.g. `300s` or `1500ms`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let ms = d.num_milliseconds();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

/// Parses a human duration such as `5min`, `5 min`, `1 day`, `1 week`,
/// `2m`, `6 hours`, `300 seconds` or `1h 30m`.
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns a description of the problem when the text is not a duration.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Ok(Duration::seconds(secs));
    }

    let mut total = Duration::zero();
    let mut rest = trimmed;
    let mut terms = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration '{text}': expected a number"));
        }
        let amount: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration '{text}': bad number"))?;
        rest = rest[number_len..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = rest[..unit_len].to_ascii_lowercase();
        rest = rest[unit_len..].trim_start_matches(|c: char| c.is_whitespace() || c == ',');

        let unit_ms: f64 = match unit.as_str() {
            "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
            "" | "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
            "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
            "d" | "day" | "days" => 86_400_000.0,
            "w" | "wk" | "wks" | "week" | "weeks" => 604_800_000.0,
            other => return Err(format!("invalid duration '{text}': unknown unit '{other}'")),
        };
        #[allow(clippy::cast_possible_truncation)]
        let ms = (amount * unit_ms).round() as i64;
        total += Duration::milliseconds(ms);
        terms += 1;
    }
    if terms == 0 {
        return Err(format!("invalid duration '{text}'"));
    }
    Ok(total)
}

/// Zone-aware formats tried after RFC 3339.
const ZONED_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M %p %z",
    "%m/%d/%Y %I:%M%p %z",
    "%m/%d/%Y %H:%M %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M %z",
];

/// Formats without a zone; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M%p",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parses a timestamp string into UTC.
///
/// Accepts RFC 3339, US style `12/1/2013 11:00 am +0000`, ISO-like
/// naive timestamps (taken as UTC), bare dates and epoch seconds.
///
/// # Errors
///
/// Returns a description of the problem when no format matches.
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, String> {
    let s = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(t) = DateTime::parse_from_str(s, fmt) {
            return Ok(t.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&t));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            if let Some(t) = d.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&t));
            }
        }
    }
    if let Ok(secs) = s.parse::<i64>() {
        if let Some(t) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(t);
        }
    }
    Err(format!("invalid date/time string: {text}"))
}

mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::milliseconds)
    }
}
