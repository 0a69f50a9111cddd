//! Operator updates (`$set`, `$inc`, ...) applied to in-memory documents

use std::cmp::Ordering;

use chrono::Utc;
use serde_json::{Number, Value};

use super::errors::{StoreError, StoreResult};
use crate::model::{current_date_value, get_path, remove_path, set_path, Document, ID_FIELD};
use crate::query::compare_values;

/// Applies an update document to `document` in place.
///
/// `inserting` is true when the document is being created by an upsert, which
/// enables `$setOnInsert`. The `_id` field is immutable once set.
pub fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> StoreResult<()> {
    if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
        return Err(StoreError::invalid_update(
            "update document requires atomic operators",
        ));
    }

    let original_id = document.get(ID_FIELD).cloned();

    for (op, fields) in update {
        let fields = fields.as_object().ok_or_else(|| {
            StoreError::invalid_update(format!("modifier {} requires a document argument", op))
        })?;

        for (path, operand) in fields {
            apply_operator(document, op, path, operand, inserting)?;
        }
    }

    if let Some(id) = original_id {
        if document.get(ID_FIELD) != Some(&id) {
            return Err(StoreError::invalid_update(
                "performing an update on the path '_id' would modify the immutable field '_id'",
            ));
        }
    }

    Ok(())
}

fn apply_operator(
    document: &mut Document,
    op: &str,
    path: &str,
    operand: &Value,
    inserting: bool,
) -> StoreResult<()> {
    match op {
        "$set" => set_path(document, path, operand.clone())?,
        "$setOnInsert" => {
            if inserting {
                set_path(document, path, operand.clone())?;
            }
        }
        "$unset" => {
            remove_path(document, path);
        }
        "$inc" | "$mul" => {
            let current = get_path(document, path).cloned();
            let value = arithmetic(op, current.as_ref(), operand, path)?;
            set_path(document, path, value)?;
        }
        "$min" | "$max" => {
            let wanted = if op == "$min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let replace = match get_path(document, path) {
                None => true,
                Some(current) => compare_values(Some(operand), Some(current)) == wanted,
            };
            if replace {
                set_path(document, path, operand.clone())?;
            }
        }
        "$rename" => {
            let target = operand.as_str().ok_or_else(|| {
                StoreError::invalid_update(format!("$rename target for {} must be a string", path))
            })?;
            if let Some(value) = remove_path(document, path) {
                set_path(document, target, value)?;
            }
        }
        "$currentDate" => {
            let value = current_date_value(operand, &Utc::now())?;
            set_path(document, path, value)?;
        }
        "$push" | "$addToSet" => {
            let items = match operand {
                Value::Object(spec) if spec.contains_key("$each") => spec
                    .get("$each")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| StoreError::invalid_update("$each requires an array"))?,
                other => vec![other.clone()],
            };
            let mut array = existing_array(document, path)?;
            for item in items {
                if op == "$push" || !array.contains(&item) {
                    array.push(item);
                }
            }
            set_path(document, path, Value::Array(array))?;
        }
        "$pop" => {
            let mut array = existing_array(document, path)?;
            match operand.as_i64() {
                Some(-1) => {
                    if !array.is_empty() {
                        array.remove(0);
                    }
                }
                Some(1) => {
                    array.pop();
                }
                _ => return Err(StoreError::invalid_update("$pop expects 1 or -1")),
            }
            if get_path(document, path).is_some() {
                set_path(document, path, Value::Array(array))?;
            }
        }
        "$pull" | "$pullAll" => {
            let removed: Vec<Value> = match (op, operand) {
                ("$pullAll", Value::Array(items)) => items.clone(),
                ("$pullAll", _) => {
                    return Err(StoreError::invalid_update("$pullAll requires an array"))
                }
                (_, other) => vec![other.clone()],
            };
            if get_path(document, path).is_some() {
                let mut array = existing_array(document, path)?;
                array.retain(|item| !removed.contains(item));
                set_path(document, path, Value::Array(array))?;
            }
        }
        other => {
            return Err(StoreError::invalid_update(format!(
                "unsupported update operator: {}",
                other
            )))
        }
    }

    Ok(())
}

fn existing_array(document: &Document, path: &str) -> StoreResult<Vec<Value>> {
    match get_path(document, path) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(StoreError::invalid_update(format!(
            "field {} is not an array",
            path
        ))),
    }
}

fn arithmetic(op: &str, current: Option<&Value>, operand: &Value, path: &str) -> StoreResult<Value> {
    let operand = operand.as_number().ok_or_else(|| {
        StoreError::invalid_update(format!("cannot apply {} with a non-numeric argument", op))
    })?;

    let current = match current {
        None => {
            // Missing fields start at 0: $inc sets the operand, $mul sets 0
            return Ok(if op == "$inc" {
                Value::Number(operand.clone())
            } else {
                Value::from(0)
            });
        }
        Some(Value::Number(n)) => n,
        Some(_) => {
            return Err(StoreError::invalid_update(format!(
                "cannot apply {} to non-numeric field {}",
                op, path
            )))
        }
    };

    if let (Some(a), Some(b)) = (current.as_i64(), operand.as_i64()) {
        let result = if op == "$inc" {
            a.checked_add(b)
        } else {
            a.checked_mul(b)
        };
        if let Some(result) = result {
            return Ok(Value::from(result));
        }
    }

    let a = current.as_f64().unwrap_or(0.0);
    let b = operand.as_f64().unwrap_or(0.0);
    let result = if op == "$inc" { a + b } else { a * b };

    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| StoreError::invalid_update(format!("{} produced a non-finite value", op)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_set_unset_inc() {
        let mut d = doc(json!({"_id": 1, "a": 1, "b": 2}));
        apply_update(
            &mut d,
            &doc(json!({"$set": {"c.d": "x"}, "$unset": {"b": ""}, "$inc": {"a": 4}})),
            false,
        )
        .unwrap();
        assert_eq!(Value::Object(d), json!({"_id": 1, "a": 5, "c": {"d": "x"}}));
    }

    #[test]
    fn test_set_on_insert_only_when_inserting() {
        let mut d = doc(json!({"_id": 1}));
        let update = doc(json!({"$setOnInsert": {"created": true}}));
        apply_update(&mut d, &update, false).unwrap();
        assert!(!d.contains_key("created"));
        apply_update(&mut d, &update, true).unwrap();
        assert_eq!(d["created"], json!(true));
    }

    #[test]
    fn test_min_max_mul_rename() {
        let mut d = doc(json!({"lo": 5, "hi": 5, "n": 3, "old": "v"}));
        apply_update(
            &mut d,
            &doc(json!({
                "$min": {"lo": 2},
                "$max": {"hi": 1},
                "$mul": {"n": 2.5},
                "$rename": {"old": "new"}
            })),
            false,
        )
        .unwrap();
        assert_eq!(d["lo"], json!(2));
        assert_eq!(d["hi"], json!(5));
        assert_eq!(d["n"], json!(7.5));
        assert_eq!(d["new"], json!("v"));
        assert!(!d.contains_key("old"));
    }

    #[test]
    fn test_array_operators() {
        let mut d = doc(json!({"tags": ["a"]}));
        apply_update(
            &mut d,
            &doc(json!({"$push": {"tags": {"$each": ["b", "c"]}}})),
            false,
        )
        .unwrap();
        apply_update(&mut d, &doc(json!({"$addToSet": {"tags": "a"}})), false).unwrap();
        apply_update(&mut d, &doc(json!({"$pop": {"tags": -1}})), false).unwrap();
        apply_update(&mut d, &doc(json!({"$pull": {"tags": "c"}})), false).unwrap();
        assert_eq!(d["tags"], json!(["b"]));
    }

    #[test]
    fn test_rejects_plain_fields_and_bad_arguments() {
        let mut d = doc(json!({"_id": 1}));
        assert!(apply_update(&mut d, &doc(json!({"a": 1})), false).is_err());
        assert!(apply_update(&mut d, &doc(json!({"$set": 5})), false).is_err());
        assert!(apply_update(&mut d, &doc(json!({"$frobnicate": {"a": 1}})), false).is_err());
        assert!(apply_update(&mut d, &doc(json!({"$inc": {"a": "x"}})), false).is_err());
    }

    #[test]
    fn test_id_is_immutable() {
        let mut d = doc(json!({"_id": 1}));
        let err = apply_update(&mut d, &doc(json!({"$set": {"_id": 2}})), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }
}
