//! # Write path
//!
//! Single-document writes validated against version tokens after the fact,
//! with rollback on mismatch, and unordered bulk writes. Every committed
//! write invalidates the cached reads of its namespace.

mod bulk;
mod engine;
mod errors;
mod invalidate;
mod payload;
mod result;

pub use bulk::BulkWriteCoordinator;
pub use engine::{DeleteRequest, Method, OptimisticWriteEngine, WriteMode, WriteRequest};
pub use errors::{WriteError, WriteResult};
pub use invalidate::CacheInvalidator;
pub use payload::{replace_document, update_document};
pub use result::{BulkOperationResult, CollectionCreation, OperationResult, StatusHint};
