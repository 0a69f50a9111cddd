//! Read path errors

use thiserror::Error;

use crate::store::StoreError;

/// Result type for reads
pub type ReadResult<T> = Result<T, ReadError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    /// Pages are numbered from 1
    #[error("Invalid page number: {0}")]
    InvalidPage(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}
