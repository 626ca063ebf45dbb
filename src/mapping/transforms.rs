//! Built-in transforms and checks
//!
//! Everything here is total over `serde_json::Value`: bad input comes back as
//! an `Err(message)`, which the validator records against the field.

use super::types::{Transform, Validation};
use crate::schema::{JsonType, EMAIL_RE};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};
use std::panic::AssertUnwindSafe;

type Outcome<T> = std::result::Result<T, String>;

/// Epoch values above this are taken as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Apply a transform, turning panics in custom code into errors
pub(crate) fn apply(transform: &Transform, value: &Value) -> Outcome<Value> {
    match transform {
        Transform::Custom(custom) => {
            let func = &custom.func;
            std::panic::catch_unwind(AssertUnwindSafe(|| func(value)))
                .unwrap_or_else(|panic| Err(panic_message(&custom.name, panic.as_ref())))
        }
        builtin => apply_builtin(builtin, value),
    }
}

fn apply_builtin(transform: &Transform, value: &Value) -> Outcome<Value> {
    match transform {
        Transform::Trim => map_str(value, |s| s.trim().to_string()),
        Transform::Lowercase => map_str(value, str::to_lowercase),
        Transform::Uppercase => map_str(value, str::to_uppercase),
        Transform::ToString => Ok(Value::String(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        Transform::ToInteger => to_integer(value).map(Value::from),
        Transform::ToNumber => to_number(value),
        Transform::ToBoolean => to_boolean(value).map(Value::Bool),
        Transform::Timestamp => to_timestamp(value).map(|ts| {
            Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }),
        Transform::CentsToUnits => {
            let cents = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| format!("expected an amount in cents, got {}", describe(value)))?;
            float(cents / 100.0)
        }
        Transform::Default(_) => Ok(value.clone()),
        Transform::Custom(_) => apply(transform, value),
    }
}

/// Run a check against a transformed value
pub(crate) fn check(validation: &Validation, value: &Value) -> Outcome<()> {
    match validation {
        Validation::Type(expected) => {
            let actual = JsonType::of(value);
            if expected.types().iter().any(|t| t.accepts(actual)) {
                Ok(())
            } else {
                Err(format!("expected {}, got {actual}", type_list(expected.types())))
            }
        }
        Validation::Enum(allowed) => {
            if allowed.contains(value) {
                Ok(())
            } else {
                Err(format!("{} is not one of the allowed values", describe(value)))
            }
        }
        Validation::Regex(pattern) => match value {
            Value::String(s) if pattern.0.is_match(s) => Ok(()),
            _ => Err(format!("does not match /{}/", pattern.0.as_str())),
        },
        Validation::Email => match value {
            Value::String(s) if EMAIL_RE.is_match(s) => Ok(()),
            _ => Err(format!("{} is not an email address", describe(value))),
        },
        Validation::NonEmpty => {
            let empty = match value {
                Value::String(s) => s.trim().is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                Value::Null => true,
                _ => false,
            };
            if empty {
                Err("must not be empty".to_string())
            } else {
                Ok(())
            }
        }
        Validation::Range { min, max } => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("expected a number, got {}", describe(value)))?;
            if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                Err(format!(
                    "{n} is outside [{}, {}]",
                    min.map_or("-inf".to_string(), |v| v.to_string()),
                    max.map_or("inf".to_string(), |v| v.to_string())
                ))
            } else {
                Ok(())
            }
        }
        Validation::Custom(custom) => {
            let func = &custom.func;
            std::panic::catch_unwind(AssertUnwindSafe(|| func(value)))
                .unwrap_or_else(|panic| Err(panic_message(&custom.name, panic.as_ref())))
        }
    }
}

// ============================================================================
// Coercions
// ============================================================================

fn map_str(value: &Value, f: impl Fn(&str) -> String) -> Outcome<Value> {
    match value {
        Value::String(s) => Ok(Value::String(f(s))),
        other => Err(format!("expected a string, got {}", describe(other))),
    }
}

fn to_integer(value: &Value) -> Outcome<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{s}' is not an integer")),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("cannot convert {} to an integer", describe(other))),
    }
}

fn to_number(value: &Value) -> Outcome<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            let f = trimmed
                .parse::<f64>()
                .map_err(|_| format!("'{s}' is not a number"))?;
            float(f)
        }
        other => Err(format!("cannot convert {} to a number", describe(other))),
    }
}

fn float(f: f64) -> Outcome<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("{f} is not a finite number"))
}

fn to_boolean(value: &Value) -> Outcome<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{n} is not a boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" => Ok(false),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        other => Err(format!("cannot convert {} to a boolean", describe(other))),
    }
}

fn to_timestamp(value: &Value) -> Outcome<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n
                .as_i64()
                .ok_or_else(|| format!("{n} is not an epoch timestamp"))?;
            let parsed = if raw.abs() > MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            };
            parsed.ok_or_else(|| format!("{raw} is out of range"))
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(naive.and_utc());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Ok(naive.and_utc());
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                    return Ok(midnight.and_utc());
                }
            }
            if let Ok(raw) = s.parse::<i64>() {
                return to_timestamp(&Value::from(raw));
            }
            Err(format!("'{s}' is not a recognised timestamp"))
        }
        other => Err(format!("cannot convert {} to a timestamp", describe(other))),
    }
}

// ============================================================================
// Messages
// ============================================================================

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
        other => other.to_string(),
    }
}

fn type_list(types: std::collections::BTreeSet<JsonType>) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

fn panic_message(name: &str, panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("{name} panicked: {detail}"),
        None => format!("{name} panicked"),
    }
}
