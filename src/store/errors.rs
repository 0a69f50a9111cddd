//! # Store Errors
//!
//! Errors surfaced by document-store drivers. Codes follow the server's
//! numeric error codes so callers can branch on them.

use thiserror::Error;

use crate::model::{Namespace, PayloadError};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Duplicate key on a unique index
pub const DUPLICATE_KEY_ERROR: i32 = 11000;

/// Collection already exists
pub const NAMESPACE_EXISTS_ERROR: i32 = 48;

/// Malformed argument
pub const BAD_VALUE_ERROR: i32 = 2;

/// Update document rejected
pub const FAILED_TO_PARSE_ERROR: i32 = 9;

/// Internal store failure
pub const INTERNAL_ERROR: i32 = 1;

/// Name of the unique index on `_id`
pub const ID_INDEX: &str = "_id_";

/// Store errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A unique index rejected the write
    #[error("E11000 duplicate key error collection: {namespace} index: {index} dup key: {key}")]
    DuplicateKey {
        namespace: Namespace,
        index: String,
        key: String,
    },

    /// Collection already exists
    #[error("Collection already exists: {0}")]
    NamespaceExists(Namespace),

    /// Update payload could not be applied
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Argument rejected by the store
    #[error("Bad value: {0}")]
    BadValue(String),

    /// Any other driver failure
    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn duplicate_id(namespace: &Namespace, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            namespace: namespace.clone(),
            index: ID_INDEX.to_string(),
            key: key.into(),
        }
    }

    pub fn invalid_update(msg: impl Into<String>) -> Self {
        Self::InvalidUpdate(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Numeric error code
    pub fn code(&self) -> i32 {
        match self {
            StoreError::DuplicateKey { .. } => DUPLICATE_KEY_ERROR,
            StoreError::NamespaceExists(_) => NAMESPACE_EXISTS_ERROR,
            StoreError::InvalidUpdate(_) => FAILED_TO_PARSE_ERROR,
            StoreError::BadValue(_) => BAD_VALUE_ERROR,
            StoreError::Backend(_) => INTERNAL_ERROR,
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }

    /// True for a duplicate key on the `_id` index.
    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { index, .. } if index == ID_INDEX)
    }
}

impl From<PayloadError> for StoreError {
    fn from(err: PayloadError) -> Self {
        StoreError::InvalidUpdate(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_message_and_code() {
        let ns = Namespace::new("db", "coll");
        let err = StoreError::duplicate_id(&ns, "{ _id: 1 }");

        assert_eq!(err.code(), DUPLICATE_KEY_ERROR);
        assert!(err.is_duplicate_key());
        assert!(err.is_duplicate_id());
        assert_eq!(
            err.to_string(),
            "E11000 duplicate key error collection: db.coll index: _id_ dup key: { _id: 1 }"
        );
    }

    #[test]
    fn test_codes() {
        let ns = Namespace::new("db", "coll");
        assert_eq!(StoreError::NamespaceExists(ns).code(), NAMESPACE_EXISTS_ERROR);
        assert_eq!(StoreError::BadValue("x".into()).code(), BAD_VALUE_ERROR);
        assert_eq!(StoreError::invalid_update("x").code(), FAILED_TO_PARSE_ERROR);
    }
}
