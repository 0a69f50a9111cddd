//! Filter evaluation
//!
//! Evaluates the query-document filter language used by store predicates:
//! implicit equality, comparison operators, `$in`/`$nin`, `$exists` and the
//! logical combinators `$and`, `$or`, `$nor`. Fields may be dotted paths.
//! Array fields match when any element matches.

use std::cmp::Ordering;

use serde_json::Value;

use super::sort::compare_values;
use crate::model::{get_path, Document};

/// Evaluates filters against documents
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Checks if a document matches the filter. The empty filter matches all.
    pub fn matches(document: &Document, filter: &Document) -> bool {
        filter
            .iter()
            .all(|(key, condition)| Self::matches_clause(document, key, condition))
    }

    fn matches_clause(document: &Document, key: &str, condition: &Value) -> bool {
        match key {
            "$and" => Self::sub_filters(condition)
                .map(|mut subs| subs.all(|f| Self::matches(document, f)))
                .unwrap_or(false),
            "$or" => Self::sub_filters(condition)
                .map(|mut subs| subs.any(|f| Self::matches(document, f)))
                .unwrap_or(false),
            "$nor" => Self::sub_filters(condition)
                .map(|mut subs| !subs.any(|f| Self::matches(document, f)))
                .unwrap_or(false),
            field => Self::matches_field(get_path(document, field), condition),
        }
    }

    fn sub_filters(condition: &Value) -> Option<impl Iterator<Item = &Document>> {
        let items = condition.as_array()?;
        Some(items.iter().filter_map(Value::as_object))
    }

    fn matches_field(actual: Option<&Value>, condition: &Value) -> bool {
        match condition {
            Value::Object(ops) if Self::is_operator_object(ops) => ops
                .iter()
                .all(|(op, operand)| Self::matches_operator(actual, op, operand)),
            expected => Self::eq_match(actual, expected),
        }
    }

    fn is_operator_object(map: &Document) -> bool {
        !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
    }

    fn matches_operator(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
        match op {
            "$eq" => Self::eq_match(actual, operand),
            "$ne" => !Self::eq_match(actual, operand),
            "$gt" => Self::range_match(actual, operand, |o| o == Ordering::Greater),
            "$gte" => Self::range_match(actual, operand, |o| o != Ordering::Less),
            "$lt" => Self::range_match(actual, operand, |o| o == Ordering::Less),
            "$lte" => Self::range_match(actual, operand, |o| o != Ordering::Greater),
            "$in" => operand
                .as_array()
                .map(|candidates| candidates.iter().any(|c| Self::eq_match(actual, c)))
                .unwrap_or(false),
            "$nin" => operand
                .as_array()
                .map(|candidates| !candidates.iter().any(|c| Self::eq_match(actual, c)))
                .unwrap_or(false),
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(true);
                actual.is_some() == wanted
            }
            _ => false,
        }
    }

    /// Exact equality, no coercion. `null` also matches a missing field.
    fn eq_match(actual: Option<&Value>, expected: &Value) -> bool {
        match actual {
            None => expected.is_null(),
            Some(value) if value == expected => true,
            Some(Value::Array(items)) => items.iter().any(|item| item == expected),
            Some(_) => false,
        }
    }

    /// Range comparison between values of the same type only.
    fn range_match<F>(actual: Option<&Value>, bound: &Value, accept: F) -> bool
    where
        F: Fn(Ordering) -> bool,
    {
        let comparable = |v: &Value| match (v, bound) {
            (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
                accept(compare_values(Some(v), Some(bound)))
            }
            _ => false,
        };

        match actual {
            Some(Value::Array(items)) => items.iter().any(comparable),
            Some(value) => comparable(value),
            None => false,
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
    fn test_empty_filter_matches_everything() {
        assert!(FilterEvaluator::matches(&doc(json!({"a": 1})), &Document::new()));
    }

    #[test]
    fn test_equality_no_type_coercion() {
        let d = doc(json!({"value": 123}));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"value": 123}))));
        assert!(!FilterEvaluator::matches(&d, &doc(json!({"value": "123"}))));
    }

    #[test]
    fn test_range_operators() {
        let d = doc(json!({"age": 25}));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"age": {"$gte": 18, "$lt": 30}}))));
        assert!(!FilterEvaluator::matches(&d, &doc(json!({"age": {"$gt": 25}}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"age": {"$lte": 25}}))));
        assert!(!FilterEvaluator::matches(&d, &doc(json!({"age": {"$gt": "a"}}))));
    }

    #[test]
    fn test_dotted_paths_and_arrays() {
        let d = doc(json!({"a": {"b": 2}, "tags": ["x", "y"]}));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"a.b": 2}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"tags": "y"}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"tags": {"$in": ["z", "x"]}}))));
    }

    #[test]
    fn test_logical_operators() {
        let d = doc(json!({"a": 1, "b": 2}));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"$and": [{"a": 1}, {"b": 2}]}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"$or": [{"a": 9}, {"b": 2}]}))));
        assert!(!FilterEvaluator::matches(&d, &doc(json!({"$nor": [{"a": 1}]}))));
    }

    #[test]
    fn test_missing_field_and_null() {
        let d = doc(json!({"a": 1}));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"missing": null}))));
        assert!(!FilterEvaluator::matches(&d, &doc(json!({"missing": 1}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"a": {"$exists": true}}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"missing": {"$exists": false}}))));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"missing": {"$ne": 1}}))));
    }

    #[test]
    fn test_embedded_document_equality() {
        let d = doc(json!({"a": {"b": 1}}));
        assert!(FilterEvaluator::matches(&d, &doc(json!({"a": {"b": 1}}))));
        assert!(!FilterEvaluator::matches(&d, &doc(json!({"a": {"b": 2}}))));
    }
}
