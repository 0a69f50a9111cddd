//! Fully-qualified collection names

use std::fmt;

use serde::{Deserialize, Serialize};

/// Database + collection identifying one logical document set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parses `db.collection`. The collection part may itself contain dots.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (database, collection) = full_name.split_once('.')?;
        if database.is_empty() || collection.is_empty() {
            return None;
        }
        Some(Self::new(database, collection))
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let ns = Namespace::parse("shop.orders.archive").unwrap();
        assert_eq!(ns.database(), "shop");
        assert_eq!(ns.collection(), "orders.archive");
        assert_eq!(ns.to_string(), "shop.orders.archive");
    }

    #[test]
    fn test_parse_rejects_incomplete_names() {
        assert!(Namespace::parse("shop").is_none());
        assert!(Namespace::parse(".orders").is_none());
        assert!(Namespace::parse("shop.").is_none());
    }
}
