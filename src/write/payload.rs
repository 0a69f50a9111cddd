//! Update and replacement documents built from request content

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::model::{
    contains_update_operators, current_date_value, flatten, is_update_operator, unflatten,
    Document, PayloadError,
};

/// Builds the merge document for a patch.
///
/// Update operators pass through verbatim; every other field is set through
/// `$set`, by dotted path when `flatten_fields` is on so nested objects are
/// merged instead of overwritten.
pub fn update_document(data: &Document, flatten_fields: bool) -> Document {
    let mut update = Document::new();
    let mut fields = Document::new();

    for (key, value) in data {
        if is_update_operator(key) {
            update.insert(key.clone(), value.clone());
        } else {
            fields.insert(key.clone(), value.clone());
        }
    }

    if flatten_fields {
        fields = flatten(&fields);
    }
    if fields.is_empty() {
        return update;
    }

    match update.get_mut("$set") {
        None => {
            update.insert("$set".to_string(), Value::Object(fields));
        }
        Some(Value::Object(set)) => set.extend(fields),
        Some(other) => {
            // the store rejects the non-document $set
            debug!(set = %other, "$set is not an object");
        }
    }

    update
}

/// Builds the replacement document for a put or post.
///
/// Content with update operators has `$currentDate` resolved to literal
/// values and dotted keys expanded into nested objects.
pub fn replace_document(data: &Document, now: &DateTime<Utc>) -> Result<Document, PayloadError> {
    if !contains_update_operators(data, false) {
        return Ok(data.clone());
    }

    let mut replacement = data.clone();
    if let Some(Value::Object(fields)) = replacement.remove("$currentDate") {
        for (field, spec) in &fields {
            replacement.insert(field.clone(), current_date_value(spec, now)?);
        }
    }

    unflatten(&replacement)
}
