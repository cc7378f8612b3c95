use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

/// Sub-type of an extended time column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendedTimeKind {
    Date,
    Time,
    TimestampTz,
    TimestampNtz,
}

impl ExtendedTimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtendedTimeKind::Date => "date",
            ExtendedTimeKind::Time => "time",
            ExtendedTimeKind::TimestampTz => "timestamp_tz",
            ExtendedTimeKind::TimestampNtz => "timestamp_ntz",
        }
    }
}

/// Semantic type of a column, inferred from values or supplied by a schema.
///
/// A column starts as [`KindDetails::Invalid`] until a non-null value is observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KindDetails {
    #[default]
    Invalid,
    String,
    Integer,
    Float,
    Boolean,
    /// JSON objects, and strings holding JSON documents.
    Struct,
    Array,
    Decimal {
        precision: Option<u16>,
        scale: u16,
    },
    ExtendedTime(ExtendedTimeKind),
}

impl KindDetails {
    pub fn is_invalid(&self) -> bool {
        matches!(self, KindDetails::Invalid)
    }

    pub fn name(&self) -> &'static str {
        match self {
            KindDetails::Invalid => "invalid",
            KindDetails::String => "string",
            KindDetails::Integer => "int",
            KindDetails::Float => "float",
            KindDetails::Boolean => "bool",
            KindDetails::Struct => "struct",
            KindDetails::Array => "array",
            KindDetails::Decimal { .. } => "decimal",
            KindDetails::ExtendedTime(_) => "extended_time",
        }
    }
}

impl fmt::Display for KindDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindDetails::Decimal {
                precision: Some(precision),
                scale,
            } => write!(f, "decimal({precision}, {scale})"),
            KindDetails::Decimal {
                precision: None,
                scale,
            } => write!(f, "decimal(*, {scale})"),
            KindDetails::ExtendedTime(time_kind) => {
                write!(f, "extended_time({})", time_kind.as_str())
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Per-column kind hints that take precedence over value inference.
pub type OptionalSchema = HashMap<String, KindDetails>;

/// Infers the kind of `value` for `column`.
///
/// A hint in `optional_schema` wins over inference.
pub fn parse_value(
    column: &str,
    optional_schema: Option<&OptionalSchema>,
    value: &Value,
) -> KindDetails {
    if let Some(kind) = optional_schema.and_then(|schema| schema.get(column)) {
        return *kind;
    }

    match value {
        Value::Null => KindDetails::Invalid,
        Value::Bool(_) => KindDetails::Boolean,
        Value::Number(number) => {
            if number.is_i64() || number.is_u64() {
                KindDetails::Integer
            } else {
                KindDetails::Float
            }
        }
        Value::String(value) => parse_string(value),
        Value::Array(_) => KindDetails::Array,
        Value::Object(_) => KindDetails::Struct,
    }
}

fn parse_string(value: &str) -> KindDetails {
    // Only strings that could be a date or time pay for the datetime parsing.
    if (value.contains(':') || value.contains('-'))
        && let Some(time_kind) = parse_extended_time(value)
    {
        return KindDetails::ExtendedTime(time_kind);
    }

    if is_json(value) {
        return KindDetails::Struct;
    }

    KindDetails::String
}

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Returns the time kind of `value` if it parses as a date, time or timestamp.
pub fn parse_extended_time(value: &str) -> Option<ExtendedTimeKind> {
    if DateTime::parse_from_rfc3339(value).is_ok() {
        return Some(ExtendedTimeKind::TimestampTz);
    }

    if NAIVE_DATETIME_FORMATS
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(value, format).is_ok())
    {
        return Some(ExtendedTimeKind::TimestampNtz);
    }

    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
        return Some(ExtendedTimeKind::Date);
    }

    if NaiveTime::parse_from_str(value, "%H:%M:%S%.f").is_ok() {
        return Some(ExtendedTimeKind::Time);
    }

    None
}

/// Returns `true` if `value` holds a JSON object or array.
pub fn is_json(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.len() < 2 {
        return false;
    }

    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));

    looks_like_json && serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok()
}
