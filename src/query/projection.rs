//! Field projection

use serde_json::Value;

use crate::model::{get_path, remove_path, set_path, Document, ID_FIELD};

/// Field selection applied to returned documents.
///
/// A projection is either inclusive (`{"a": 1}`: only listed fields plus
/// `_id`) or exclusive (`{"a": 0}`: everything but listed fields). `_id` may
/// be excluded from an inclusive projection. The empty projection returns
/// documents unchanged.
pub struct Projection;

impl Projection {
    pub fn apply(document: &Document, projection: &Document) -> Document {
        if projection.is_empty() {
            return document.clone();
        }

        let inclusive = projection
            .iter()
            .any(|(field, flag)| field != ID_FIELD && Self::truthy(flag));
        let keep_id = projection.get(ID_FIELD).map(Self::truthy).unwrap_or(true);

        if inclusive {
            let mut out = Document::new();
            if keep_id {
                if let Some(id) = document.get(ID_FIELD) {
                    out.insert(ID_FIELD.to_string(), id.clone());
                }
            }
            for (field, flag) in projection {
                if field == ID_FIELD || !Self::truthy(flag) {
                    continue;
                }
                if let Some(value) = get_path(document, field) {
                    // Paths into scalars are skipped, not errors
                    let _ = set_path(&mut out, field, value.clone());
                }
            }
            out
        } else {
            let mut out = document.clone();
            for (field, flag) in projection {
                if !Self::truthy(flag) {
                    remove_path(&mut out, field);
                }
            }
            out
        }
    }

    fn truthy(flag: &Value) -> bool {
        match flag {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::Null => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_projection_returns_everything() {
        let d = doc(json!({"_id": 1, "a": 2}));
        assert_eq!(Projection::apply(&d, &Document::new()), d);
    }

    #[test]
    fn test_inclusive_projection_keeps_id() {
        let d = doc(json!({"_id": 1, "a": 2, "b": {"c": 3, "d": 4}}));
        let out = Projection::apply(&d, &doc(json!({"b.c": 1})));
        assert_eq!(Value::Object(out), json!({"_id": 1, "b": {"c": 3}}));
    }

    #[test]
    fn test_inclusive_projection_without_id() {
        let d = doc(json!({"_id": 1, "_etag": "x", "a": 2}));
        let out = Projection::apply(&d, &doc(json!({"_etag": 1, "_id": 0})));
        assert_eq!(Value::Object(out), json!({"_etag": "x"}));
    }

    #[test]
    fn test_exclusive_projection() {
        let d = doc(json!({"_id": 1, "a": 2, "b": 3}));
        let out = Projection::apply(&d, &doc(json!({"b": 0})));
        assert_eq!(Value::Object(out), json!({"_id": 1, "a": 2}));
    }
}
