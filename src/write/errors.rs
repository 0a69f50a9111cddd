//! Write path errors

use thiserror::Error;

use crate::model::PayloadError;
use crate::store::StoreError;

/// Result type for write operations
pub type WriteResult<T> = Result<T, WriteError>;

/// Write errors
///
/// `BadRequest` describes a payload the engine refused before touching the
/// store. `Store` carries any store failure the engine does not classify.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WriteError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<PayloadError> for WriteError {
    fn from(err: PayloadError) -> Self {
        WriteError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_error_is_bad_request() {
        let err: WriteError = PayloadError::CurrentDate.into();
        assert_eq!(err, WriteError::BadRequest("wrong $currentDate operator".into()));
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: WriteError = StoreError::backend("down").into();
        assert_eq!(err.to_string(), "Store error: down");
    }
}
