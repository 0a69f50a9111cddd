//! Write outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::WriteError;
use crate::model::{Document, VersionToken};
use crate::store::BulkWriteOutcome;

/// Outcome class of a write, mapped onto HTTP codes by callers that want it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusHint {
    /// Caller infers Created or Ok from the previous snapshot
    #[default]
    Unset,
    Ok,
    Created,
    NoContent,
    MultiStatus,
    BadRequest,
    NotFound,
    Conflict,
    PreconditionFailed,
}

impl StatusHint {
    /// Conventional HTTP status code; `None` for `Unset`
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StatusHint::Unset => None,
            StatusHint::Ok => Some(200),
            StatusHint::Created => Some(201),
            StatusHint::NoContent => Some(204),
            StatusHint::MultiStatus => Some(207),
            StatusHint::BadRequest => Some(400),
            StatusHint::NotFound => Some(404),
            StatusHint::Conflict => Some(409),
            StatusHint::PreconditionFailed => Some(412),
        }
    }

    /// True for outcomes where the write took effect
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusHint::Ok | StatusHint::Created | StatusHint::NoContent | StatusHint::MultiStatus
        )
    }
}

/// Result of a single-document write or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResult {
    pub status: StatusHint,
    /// New version token on success, the previous one on a version mismatch
    pub etag: Option<Value>,
    pub old_data: Option<Document>,
    pub new_data: Option<Document>,
    pub cause: Option<WriteError>,
}

impl OperationResult {
    pub fn with_status(status: StatusHint) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// A request refused before anything was written
    pub fn bad_request(cause: impl Into<WriteError>) -> Self {
        Self {
            status: StatusHint::BadRequest,
            cause: Some(cause.into()),
            ..Self::default()
        }
    }

    /// Status with `Unset` resolved from the previous snapshot.
    pub fn resolved_status(&self) -> StatusHint {
        match self.status {
            StatusHint::Unset if self.old_data.is_none() => StatusHint::Created,
            StatusHint::Unset => StatusHint::Ok,
            status => status,
        }
    }
}

/// Result of a bulk write, patch or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOperationResult {
    pub status: StatusHint,
    /// Token shared by every document of a bulk write
    pub etag: Option<VersionToken>,
    pub outcome: Option<BulkWriteOutcome>,
    pub cause: Option<WriteError>,
}

impl BulkOperationResult {
    pub fn bad_request(cause: impl Into<WriteError>) -> Self {
        Self {
            status: StatusHint::BadRequest,
            cause: Some(cause.into()),
            ..Self::default()
        }
    }
}

/// Outcome of an explicit collection creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionCreation {
    Created,
    /// Lost a creation race or the collection was already there
    AlreadyExisted,
}
