//! Update-operator vocabulary and payload reshaping helpers

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use super::document::{set_path, Document};

/// Operators recognised in update payloads.
pub const UPDATE_OPERATORS: &[&str] = &[
    "$inc",
    "$mul",
    "$rename",
    "$setOnInsert",
    "$set",
    "$unset",
    "$min",
    "$max",
    "$currentDate",
    "$",
    "$[]",
    "$addToSet",
    "$pop",
    "$pullAll",
    "$pull",
    "$pushAll",
    "$push",
    "$each",
    "$position",
    "$slice",
    "$sort",
    "$bit",
    "$isolated",
];

/// Errors raised while reshaping a client payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("wrong $currentDate operator")]
    CurrentDate,

    #[error("conflicting field path: {0}")]
    PathConflict(String),

    #[error("payload is not a document")]
    NotADocument,
}

pub fn is_update_operator(key: &str) -> bool {
    UPDATE_OPERATORS.contains(&key)
}

/// True when any top-level key is an update operator.
///
/// With `ignore_current_date`, `$currentDate` alone does not count, since
/// replace payloads resolve it locally.
pub fn contains_update_operators(document: &Document, ignore_current_date: bool) -> bool {
    document.keys().any(|key| {
        if ignore_current_date && key == "$currentDate" {
            return false;
        }
        is_update_operator(key)
    })
}

/// Flattens nested objects into dotted keys. Arrays and empty objects are
/// leaves.
pub fn flatten(document: &Document) -> Document {
    let mut out = Document::new();
    flatten_into(&mut out, None, document);
    out
}

fn flatten_into(out: &mut Document, prefix: Option<&str>, document: &Document) {
    for (key, value) in document {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };

        match value {
            Value::Object(map) if !map.is_empty() => flatten_into(out, Some(&path), map),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Expands dotted keys into nested objects.
pub fn unflatten(document: &Document) -> Result<Document, PayloadError> {
    let mut out = Document::new();

    for (key, value) in document {
        let value = match value {
            Value::Object(map) => Value::Object(unflatten(map)?),
            other => other.clone(),
        };

        if key.contains('.') && !key.starts_with('$') {
            set_path(&mut out, key, value)?;
        } else {
            merge_field(&mut out, key, value)?;
        }
    }

    Ok(out)
}

fn merge_field(out: &mut Document, key: &str, value: Value) -> Result<(), PayloadError> {
    match (out.get_mut(key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                merge_field(existing, &k, v)?;
            }
            Ok(())
        }
        (Some(_), _) => Err(PayloadError::PathConflict(key.to_string())),
        (None, value) => {
            out.insert(key.to_string(), value);
            Ok(())
        }
    }
}

/// Resolves one `$currentDate` field spec against `now`.
///
/// `true` and `{"$type": "date"}` produce a date, `{"$type": "timestamp"}`
/// produces a timestamp. Anything else is rejected.
pub fn current_date_value(spec: &Value, now: &DateTime<Utc>) -> Result<Value, PayloadError> {
    let as_date = || json!({ "$date": now.timestamp_millis() });

    match spec {
        Value::Bool(true) => Ok(as_date()),
        Value::Object(map) => match map.get("$type").and_then(Value::as_str) {
            Some("date") => Ok(as_date()),
            Some("timestamp") => Ok(json!({ "$timestamp": { "t": now.timestamp(), "i": 0 } })),
            _ => Err(PayloadError::CurrentDate),
        },
        _ => Err(PayloadError::CurrentDate),
    }
}
