//! Built-in filter handlers
//!
//! Each tag maps to a coercion and an operator. The coercion turns the raw
//! input into a typed operand, the operator decides the match fragment.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};

use super::FilterOptions;
use crate::pipeline::operator::{truthy, Operator};
use crate::pipeline::{PipelineError, Result};

/// Coerces a raw input value; `field` is only used in error messages
pub(crate) type Coerce = fn(field: &str, value: &Value, options: &FilterOptions) -> Result<Value>;

/// One entry of the handler table
#[derive(Clone, Copy)]
pub(crate) struct Handler {
    pub(crate) coerce: Coerce,
    pub(crate) operator: Operator,
}

static HANDLERS: OnceLock<HashMap<&'static str, Handler>> = OnceLock::new();

/// Timestamp formats tried when no explicit format is configured
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const COMPARISONS: &[(&str, Operator)] = &[
    ("", Operator::Eq),
    ("!=", Operator::Ne),
    (">", Operator::Gt),
    (">=", Operator::Gte),
    ("<", Operator::Lt),
    ("<=", Operator::Lte),
];

/// Look up a built-in handler by tag
pub(crate) fn lookup(tag: &str) -> Option<Handler> {
    HANDLERS.get_or_init(build_table).get(tag).copied()
}

/// Every built-in tag, sorted
pub fn builtin_tags() -> Vec<&'static str> {
    let mut tags: Vec<_> = HANDLERS.get_or_init(build_table).keys().copied().collect();
    tags.sort_unstable();
    tags
}

fn build_table() -> HashMap<&'static str, Handler> {
    let mut table = HashMap::new();

    let numeric: [(&[&'static str; 6], Coerce); 3] = [
        (&["int", "int!=", "int>", "int>=", "int<", "int<="], coerce_int),
        (&["float", "float!=", "float>", "float>=", "float<", "float<="], coerce_float),
        (&["number", "number!=", "number>", "number>=", "number<", "number<="], coerce_number),
    ];
    for (tags, coerce) in numeric {
        for (tag, (_, operator)) in tags.iter().zip(COMPARISONS) {
            table.insert(*tag, Handler { coerce, operator: *operator });
        }
    }

    table.insert("intIn", Handler { coerce: coerce_int_list, operator: Operator::In });
    table.insert("floatIn", Handler { coerce: coerce_float_list, operator: Operator::In });

    for tag in ["bool", "boolean"] {
        table.insert(tag, Handler { coerce: coerce_bool, operator: Operator::Eq });
    }

    let dates: [(&[&'static str; 5], Coerce); 2] = [
        (&["date", "date>", "date>=", "date<", "date<="], coerce_date),
        (
            &["datetime", "datetime>", "datetime>=", "datetime<", "datetime<="],
            coerce_datetime,
        ),
    ];
    for (tags, coerce) in dates {
        let operators = [Operator::Eq, Operator::Gt, Operator::Gte, Operator::Lt, Operator::Lte];
        for (tag, operator) in tags.iter().zip(operators) {
            table.insert(*tag, Handler { coerce, operator });
        }
    }

    table
}

fn invalid(field: &str, kind: &str, value: &Value) -> PipelineError {
    PipelineError::InvalidFilterValue {
        field: field.to_string(),
        kind: kind.to_string(),
        value: value.to_string(),
    }
}

/// Length of the longest numeric prefix of `s`
fn numeric_prefix(s: &str, allow_fraction: bool) -> usize {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if allow_fraction && end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 || end > digits_start {
            end = frac;
        }
    }
    if allow_fraction && end > digits_start && end < bytes.len() && matches!(bytes[end], b'e' | b'E')
    {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > exp_digits {
            end = exp;
        }
    }
    if end == digits_start || (end == digits_start + 1 && bytes[digits_start] == b'.') {
        0
    } else {
        end
    }
}

fn coerce_int(field: &str, value: &Value, _: &FilterOptions) -> Result<Value> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .map(f64::trunc)
                    .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(Value::from)
            .ok_or_else(|| invalid(field, "int", value)),
        Value::String(s) => {
            let s = s.trim();
            let end = numeric_prefix(s, false);
            s[..end]
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(field, "int", value))
        }
        _ => Err(invalid(field, "int", value)),
    }
}

fn coerce_float(field: &str, value: &Value, _: &FilterOptions) -> Result<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let end = numeric_prefix(s, true);
            s[..end].parse::<f64>().ok()
        }
        _ => None,
    };
    parsed
        .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
        .ok_or_else(|| invalid(field, "float", value))
}

fn coerce_number(field: &str, value: &Value, _: &FilterOptions) -> Result<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(field, "number", value))
        }
        _ => Err(invalid(field, "number", value)),
    }
}

fn split_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Value::String(part.to_string()))
            .collect(),
        other => vec![other.clone()],
    }
}

fn coerce_int_list(field: &str, value: &Value, options: &FilterOptions) -> Result<Value> {
    split_list(value)
        .iter()
        .map(|item| coerce_int(field, item, options))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn coerce_float_list(field: &str, value: &Value, options: &FilterOptions) -> Result<Value> {
    split_list(value)
        .iter()
        .map(|item| coerce_float(field, item, options))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn coerce_bool(_: &str, value: &Value, _: &FilterOptions) -> Result<Value> {
    let flag = match value {
        Value::String(s) if s == "0" => false,
        other => truthy(other),
    };
    Ok(Value::Bool(flag))
}

fn invalid_date(value: &Value, options: &FilterOptions) -> PipelineError {
    PipelineError::InvalidDate {
        value: match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        format: options
            .date_format
            .clone()
            .unwrap_or_else(|| "auto".to_string()),
    }
}

/// Extended JSON date
fn encode(instant: DateTime<Utc>) -> Value {
    json!({ "$date": instant.to_rfc3339_opts(SecondsFormat::Millis, true) })
}

fn from_millis(value: &Value) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(DateTime::from_timestamp_millis)
}

fn parse_datetime(s: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s.trim();
    match format {
        Some(format) => DateTime::parse_from_str(s, format)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, format)
                    .ok()
                    .map(|ndt| Utc.from_utc_datetime(&ndt))
            })
            .or_else(|| {
                NaiveDate::parse_from_str(s, format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|ndt| Utc.from_utc_datetime(&ndt))
            }),
        None => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                DATETIME_FORMATS.iter().find_map(|format| {
                    NaiveDateTime::parse_from_str(s, format)
                        .ok()
                        .map(|ndt| Utc.from_utc_datetime(&ndt))
                })
            })
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|ndt| Utc.from_utc_datetime(&ndt))
            }),
    }
}

fn coerce_datetime(_: &str, value: &Value, options: &FilterOptions) -> Result<Value> {
    let instant = match value {
        Value::String(s) => parse_datetime(s, options.date_format.as_deref()),
        Value::Number(_) => from_millis(value),
        _ => None,
    };
    instant.map(encode).ok_or_else(|| invalid_date(value, options))
}

/// Same as date-time, truncated to midnight UTC
fn coerce_date(_: &str, value: &Value, options: &FilterOptions) -> Result<Value> {
    let instant = match value {
        Value::String(s) => parse_datetime(s, options.date_format.as_deref()),
        Value::Number(_) => from_millis(value),
        _ => None,
    };
    instant
        .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
        .map(|midnight| encode(Utc.from_utc_datetime(&midnight)))
        .ok_or_else(|| invalid_date(value, options))
}
