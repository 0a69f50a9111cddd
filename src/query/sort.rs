//! Sort specifications and value ordering
//!
//! A sort is an ordered list of keys. Comparison is deterministic and stable:
//! documents that tie on every key keep their natural order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::model::{get_path, Document};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    /// Field path
    pub field: String,
    pub direction: SortDirection,
}

/// Ordered sort specification. The default is "no sort".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::none().then_asc(field)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::none().then_desc(field)
    }

    /// Appends an ascending key
    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            direction: SortDirection::Asc,
        });
        self
    }

    /// Appends a descending key
    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compares two documents key by key.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.keys {
            let ordering = compare_values(get_path(a, &key.field), get_path(b, &key.field));
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable in-place sort. No-op for the empty spec.
    pub fn sort(&self, documents: &mut [Document]) {
        if self.is_empty() {
            return;
        }
        documents.sort_by(|a, b| self.compare(a, b));
    }
}

/// Parses `field,-other`: a leading `-` means descending, `+` or nothing
/// ascending.
impl FromStr for SortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut spec = SortSpec::none();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            spec = match part.strip_prefix('-') {
                Some(field) if !field.is_empty() => spec.then_desc(field),
                Some(_) => return Err(format!("invalid sort key: {}", part)),
                None => spec.then_asc(part.strip_prefix('+').unwrap_or(part)),
            };
        }

        Ok(spec)
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if key.direction == SortDirection::Desc {
                f.write_str("-")?;
            }
            f.write_str(&key.field)?;
        }
        Ok(())
    }
}

/// Compares two JSON values for sorting.
///
/// Ordering rules:
/// - missing < null < bool < number < string < array < object
/// - for same types, natural ordering; arrays element-wise, objects by
///   their serialized form
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => {
            let type_order = |v: &Value| -> u8 {
                match v {
                    Value::Null => 0,
                    Value::Bool(_) => 1,
                    Value::Number(_) => 2,
                    Value::String(_) => 3,
                    Value::Array(_) => 4,
                    Value::Object(_) => 5,
                }
            };

            let a_type = type_order(a_val);
            let b_type = type_order(b_val);

            if a_type != b_type {
                return a_type.cmp(&b_type);
            }

            match (a_val, b_val) {
                (Value::Bool(a_b), Value::Bool(b_b)) => a_b.cmp(b_b),
                (Value::Number(a_n), Value::Number(b_n)) => {
                    if let (Some(ai), Some(bi)) = (a_n.as_i64(), b_n.as_i64()) {
                        return ai.cmp(&bi);
                    }
                    let a_f = a_n.as_f64().unwrap_or(0.0);
                    let b_f = b_n.as_f64().unwrap_or(0.0);
                    a_f.partial_cmp(&b_f).unwrap_or(Ordering::Equal)
                }
                (Value::String(a_s), Value::String(b_s)) => a_s.cmp(b_s),
                (Value::Array(a_items), Value::Array(b_items)) => {
                    for (x, y) in a_items.iter().zip(b_items.iter()) {
                        let ordering = compare_values(Some(x), Some(y));
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    a_items.len().cmp(&b_items.len())
                }
                (Value::Object(_), Value::Object(_)) => a_val.to_string().cmp(&b_val.to_string()),
                _ => Ordering::Equal,
            }
        }
    }
}
