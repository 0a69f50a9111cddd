//! Document type and field-path helpers

use serde_json::{Map, Value};
use uuid::Uuid;

use super::operators::PayloadError;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Identifier field
pub const ID_FIELD: &str = "_id";

/// Version token field
pub const ETAG_FIELD: &str = "_etag";

/// Returns the document identifier, if present.
pub fn document_id(document: &Document) -> Option<&Value> {
    document.get(ID_FIELD)
}

/// Returns the document version token, if present.
pub fn document_etag(document: &Document) -> Option<&Value> {
    document.get(ETAG_FIELD)
}

/// Generates a document identifier for documents submitted without one.
pub fn generate_id() -> Value {
    Value::String(Uuid::new_v4().simple().to_string())
}

/// Builds `{ "_id": id }`.
pub fn id_filter(id: &Value) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD.to_string(), id.clone());
    filter
}

/// Combines filters with `$and`, skipping empty ones.
///
/// A single non-empty part is returned as is; no parts yields the empty
/// filter, which matches every document.
pub fn and_filters<I>(parts: I) -> Document
where
    I: IntoIterator<Item = Document>,
{
    let mut parts: Vec<Document> = parts.into_iter().filter(|p| !p.is_empty()).collect();

    match parts.len() {
        0 => Document::new(),
        1 => parts.swap_remove(0),
        _ => {
            let mut combined = Document::new();
            combined.insert(
                "$and".to_string(),
                Value::Array(parts.into_iter().map(Value::Object).collect()),
            );
            combined
        }
    }
}

/// Looks up a dotted path (`a.b.0.c`). Numeric segments index arrays.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = document.get(first)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets a dotted path, creating intermediate objects as needed.
///
/// Fails when an intermediate segment exists and is not an object.
pub fn set_path(document: &mut Document, path: &str, value: Value) -> Result<(), PayloadError> {
    match path.split_once('.') {
        None => {
            document.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));

            match child {
                Value::Object(map) => set_path(map, rest, value),
                _ => Err(PayloadError::PathConflict(path.to_string())),
            }
        }
    }
}

/// Removes a dotted path, returning the removed value.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head)? {
            Value::Object(map) => remove_path(map, rest),
            _ => None,
        },
    }
}
