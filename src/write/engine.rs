//! Optimistic single-document writes
//!
//! The store has no conditional write that understands version tokens
//! across arbitrary filter and shard-key combinations. Writes therefore
//! execute unconditionally, then compare the previous token with the
//! caller's If-Match value. On a mismatch the previous document is written
//! back, keyed by the token this write stamped, so a later writer is never
//! overwritten.
//!
//! The sequence is not atomic. A reader can observe the rejected version
//! until the rollback lands, and a failed rollback leaves it in place; both
//! are logged and counted.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::errors::{WriteError, WriteResult};
use super::invalidate::CacheInvalidator;
use super::payload::{replace_document, update_document};
use super::result::{CollectionCreation, OperationResult, StatusHint};
use crate::config::WriteConfig;
use crate::model::{
    and_filters, document_etag, document_id, id_filter, Document, Namespace, SessionHandle,
    VersionToken, ETAG_FIELD, ID_FIELD,
};
use crate::observability::EngineMetrics;
use crate::store::{DocumentStore, StoreError};

/// Request method, deciding between merge and replace semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
    Patch,
}

/// How a write treats a missing or existing target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Always create a new document
    Insert,
    /// Modify an existing document; missing target is NotFound
    Update,
    /// Modify, or create when missing
    Upsert,
}

/// A single-document write
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub session: Option<SessionHandle>,
    pub namespace: Namespace,
    pub method: Method,
    pub write_mode: WriteMode,
    pub document_id: Option<Value>,
    pub filter: Option<Document>,
    pub shard_keys: Option<Document>,
    pub content: Value,
    pub if_match: Option<Value>,
    pub check_etag: bool,
}

impl WriteRequest {
    pub fn new(namespace: Namespace, method: Method, write_mode: WriteMode, content: Value) -> Self {
        Self {
            session: None,
            namespace,
            method,
            write_mode,
            document_id: None,
            filter: None,
            shard_keys: None,
            content,
            if_match: None,
            check_etag: false,
        }
    }

    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_shard_keys(mut self, shard_keys: Document) -> Self {
        self.shard_keys = Some(shard_keys);
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<Value>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_etag_check(mut self, check_etag: bool) -> Self {
        self.check_etag = check_etag;
        self
    }
}

/// A single-document delete
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub session: Option<SessionHandle>,
    pub namespace: Namespace,
    pub document_id: Option<Value>,
    pub filter: Option<Document>,
    pub shard_keys: Option<Document>,
    pub if_match: Option<Value>,
    pub check_etag: bool,
}

impl DeleteRequest {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            session: None,
            namespace,
            document_id: None,
            filter: None,
            shard_keys: None,
            if_match: None,
            check_etag: false,
        }
    }

    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_shard_keys(mut self, shard_keys: Document) -> Self {
        self.shard_keys = Some(shard_keys);
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<Value>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_etag_check(mut self, check_etag: bool) -> Self {
        self.check_etag = check_etag;
        self
    }
}

/// Result of comparing the previous token with If-Match
enum VersionCheck {
    Matched,
    /// A version existed and no If-Match was sent
    Missing,
    Mismatched,
}

fn check_version(previous: &Document, if_match: Option<&Value>) -> VersionCheck {
    match (document_etag(previous), if_match) {
        (Some(_), None) => VersionCheck::Missing,
        (stored, given) if stored == given => VersionCheck::Matched,
        _ => VersionCheck::Mismatched,
    }
}

/// Matches no document, so an upsert on it always inserts.
fn impossible_condition() -> Document {
    let mut filter = Document::new();
    filter.insert(ETAG_FIELD.to_string(), VersionToken::generate().to_value());
    filter
}

fn optional(part: Option<&Document>) -> Document {
    part.cloned().unwrap_or_default()
}

/// Single-document writes with post-write version validation.
pub struct OptimisticWriteEngine {
    store: Arc<dyn DocumentStore>,
    invalidator: CacheInvalidator,
    config: WriteConfig,
    metrics: Arc<EngineMetrics>,
}

impl OptimisticWriteEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        invalidator: CacheInvalidator,
        config: WriteConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            invalidator,
            config,
            metrics,
        }
    }

    /// Inserts, updates or upserts one document.
    ///
    /// Refused payloads, missing targets and duplicate keys come back as
    /// results with the matching status; unclassified store failures are
    /// returned as errors.
    pub fn write_document(&self, request: &WriteRequest) -> WriteResult<OperationResult> {
        let Value::Object(content) = &request.content else {
            return Ok(OperationResult::bad_request(WriteError::bad_request(
                "content must be a JSON object",
            )));
        };

        let session = request.session.as_ref();
        let namespace = &request.namespace;
        let id_part = request
            .document_id
            .as_ref()
            .map(id_filter)
            .unwrap_or_else(impossible_condition);
        let predicate = and_filters([
            id_part,
            optional(request.shard_keys.as_ref()),
            optional(request.filter.as_ref()),
        ]);

        let previous = match &request.document_id {
            Some(_) => {
                let found = self.store.find_one(session, namespace, &predicate, &Document::new())?;
                if found.is_none() && request.write_mode == WriteMode::Update {
                    return Ok(OperationResult::with_status(StatusHint::NotFound));
                }
                found
            }
            None if request.write_mode == WriteMode::Update => {
                debug!(namespace = %namespace, "update without a document id");
                return Ok(OperationResult::bad_request(WriteError::bad_request(
                    "update requires a document id",
                )));
            }
            None => None,
        };

        let token = VersionToken::generate();
        let mut content = content.clone();
        content.insert(ETAG_FIELD.to_string(), token.to_value());

        let written = match self.execute(request, &predicate, content) {
            Ok(written) => written,
            Err(WriteError::BadRequest(msg)) => {
                return Ok(OperationResult {
                    status: StatusHint::BadRequest,
                    old_data: previous,
                    cause: Some(WriteError::BadRequest(msg)),
                    ..OperationResult::default()
                });
            }
            Err(WriteError::Store(err)) if err.is_duplicate_key() => {
                return Ok(self.duplicate_key(request, previous, err));
            }
            Err(err) => return Err(err),
        };

        let Some(previous) = previous else {
            self.committed(namespace);
            return Ok(OperationResult {
                status: StatusHint::Created,
                etag: Some(token.to_value()),
                new_data: written,
                ..OperationResult::default()
            });
        };

        if request.check_etag {
            let status = match check_version(&previous, request.if_match.as_ref()) {
                VersionCheck::Matched => None,
                VersionCheck::Missing => Some(StatusHint::Conflict),
                VersionCheck::Mismatched => Some(StatusHint::PreconditionFailed),
            };

            if let Some(status) = status {
                self.restore_replaced(request, &previous, &token);
                self.invalidator.invalidate_namespace(namespace);
                return Ok(OperationResult {
                    status,
                    etag: document_etag(&previous).cloned(),
                    old_data: Some(previous),
                    ..OperationResult::default()
                });
            }
        }

        let current = match document_id(&previous) {
            Some(id) => self
                .store
                .find_one(session, namespace, &id_filter(id), &Document::new())?,
            None => written,
        };

        self.committed(namespace);
        Ok(OperationResult {
            status: StatusHint::Ok,
            etag: Some(token.to_value()),
            old_data: Some(previous),
            new_data: current,
            cause: None,
        })
    }

    /// Runs the store write for `request`, returning the written document.
    fn execute(
        &self,
        request: &WriteRequest,
        predicate: &Document,
        content: Document,
    ) -> WriteResult<Option<Document>> {
        let session = request.session.as_ref();
        let namespace = &request.namespace;
        let upsert = request.write_mode != WriteMode::Update;

        match (request.write_mode, request.method) {
            (WriteMode::Insert, Method::Patch) => {
                let update = update_document(&content, self.config.flatten_patch);
                let insert_predicate = and_filters([
                    request.document_id.as_ref().map(id_filter).unwrap_or_default(),
                    impossible_condition(),
                    optional(request.shard_keys.as_ref()),
                ]);
                Ok(self
                    .store
                    .find_one_and_update(session, namespace, &insert_predicate, &update, true)?)
            }
            (WriteMode::Insert, _) => {
                let mut document = replace_document(&content, &Utc::now())?;
                if let Some(id) = &request.document_id {
                    document.insert(ID_FIELD.to_string(), id.clone());
                }

                let id = self.store.insert_one(session, namespace, document)?;
                let inserted = and_filters([id_filter(&id), optional(request.shard_keys.as_ref())]);
                Ok(self
                    .store
                    .find_one(session, namespace, &inserted, &Document::new())?)
            }
            (_, Method::Patch) => {
                let update = update_document(&content, self.config.flatten_patch);
                Ok(self
                    .store
                    .find_one_and_update(session, namespace, predicate, &update, upsert)?)
            }
            (_, _) => {
                let replacement = replace_document(&content, &Utc::now())?;
                Ok(self
                    .store
                    .find_one_and_replace(session, namespace, predicate, &replacement, upsert)?)
            }
        }
    }

    fn duplicate_key(
        &self,
        request: &WriteRequest,
        previous: Option<Document>,
        err: StoreError,
    ) -> OperationResult {
        let upserting = request.write_mode != WriteMode::Update;
        let filtered = request.filter.as_ref().is_some_and(|f| !f.is_empty());

        debug!(namespace = %request.namespace, error = %err, "duplicate key on write");

        OperationResult {
            status: StatusHint::Conflict,
            etag: previous.as_ref().and_then(document_etag).cloned(),
            old_data: if upserting && filtered && err.is_duplicate_id() {
                previous
            } else {
                None
            },
            cause: Some(WriteError::Store(err)),
            ..OperationResult::default()
        }
    }

    /// Writes `previous` back over the version this write stamped.
    fn restore_replaced(&self, request: &WriteRequest, previous: &Document, token: &VersionToken) {
        let Some(id) = document_id(previous) else {
            self.rollback_failed(&request.namespace, "previous document has no id");
            return;
        };

        let mut stamped = Document::new();
        stamped.insert(ETAG_FIELD.to_string(), token.to_value());
        let predicate = and_filters([
            id_filter(id),
            stamped,
            optional(request.shard_keys.as_ref()),
        ]);

        match self.store.replace_one(
            request.session.as_ref(),
            &request.namespace,
            &predicate,
            previous,
            false,
        ) {
            Ok(outcome) if outcome.modified == 1 => {
                self.metrics.increment_rollbacks();
                debug!(namespace = %request.namespace, id = %id, "restored previous version");
            }
            Ok(_) => self.rollback_failed(&request.namespace, "written version no longer present"),
            Err(err) => self.rollback_failed(&request.namespace, &err.to_string()),
        }
    }

    /// Deletes one document by id or filter.
    pub fn delete_document(&self, request: &DeleteRequest) -> WriteResult<OperationResult> {
        let filter = optional(request.filter.as_ref());
        if request.document_id.is_none() && filter.is_empty() {
            return Ok(OperationResult::bad_request(WriteError::bad_request(
                "delete requires a document id or a filter",
            )));
        }

        let session = request.session.as_ref();
        let namespace = &request.namespace;
        let predicate = and_filters([
            request.document_id.as_ref().map(id_filter).unwrap_or_default(),
            optional(request.shard_keys.as_ref()),
            filter,
        ]);

        let Some(deleted) = self.store.find_one_and_delete(session, namespace, &predicate)? else {
            return Ok(OperationResult::with_status(StatusHint::NotFound));
        };

        if request.check_etag {
            let status = match check_version(&deleted, request.if_match.as_ref()) {
                VersionCheck::Matched => None,
                VersionCheck::Missing => Some(StatusHint::Conflict),
                VersionCheck::Mismatched => Some(StatusHint::PreconditionFailed),
            };

            if let Some(status) = status {
                self.restore_deleted(request, &deleted);
                self.invalidator.invalidate_namespace(namespace);
                return Ok(OperationResult {
                    status,
                    etag: document_etag(&deleted).cloned(),
                    old_data: Some(deleted),
                    ..OperationResult::default()
                });
            }
        }

        self.committed(namespace);
        Ok(OperationResult {
            status: StatusHint::NoContent,
            etag: document_etag(&deleted).cloned(),
            old_data: Some(deleted),
            ..OperationResult::default()
        })
    }

    /// Re-inserts a deleted document verbatim.
    fn restore_deleted(&self, request: &DeleteRequest, deleted: &Document) {
        let Some(id) = document_id(deleted) else {
            self.rollback_failed(&request.namespace, "deleted document has no id");
            return;
        };

        let predicate = and_filters([id_filter(id), optional(request.shard_keys.as_ref())]);
        match self.store.find_one_and_replace(
            request.session.as_ref(),
            &request.namespace,
            &predicate,
            deleted,
            true,
        ) {
            Ok(_) => {
                self.metrics.increment_rollbacks();
                debug!(namespace = %request.namespace, id = %id, "restored deleted document");
            }
            Err(err) => self.rollback_failed(&request.namespace, &err.to_string()),
        }
    }

    /// Creates a collection. Losing a creation race is not an error.
    pub fn create_collection(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
    ) -> WriteResult<CollectionCreation> {
        match self.store.create_collection(session, namespace) {
            Ok(()) => Ok(CollectionCreation::Created),
            Err(StoreError::NamespaceExists(_)) => {
                debug!(namespace = %namespace, "collection already exists");
                Ok(CollectionCreation::AlreadyExisted)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn committed(&self, namespace: &Namespace) {
        self.invalidator.invalidate_namespace(namespace);
        self.metrics.increment_writes_committed();
    }

    fn rollback_failed(&self, namespace: &Namespace, reason: &str) {
        self.metrics.increment_rollback_failures();
        warn!(
            namespace = %namespace,
            reason,
            "rollback failed, store keeps the rejected version"
        );
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
    fn test_check_version() {
        let tagged = doc(json!({"_id": 1, "_etag": "a"}));
        let untagged = doc(json!({"_id": 1}));

        assert!(matches!(check_version(&tagged, None), VersionCheck::Missing));
        assert!(matches!(
            check_version(&tagged, Some(&json!("a"))),
            VersionCheck::Matched
        ));
        assert!(matches!(
            check_version(&tagged, Some(&json!("b"))),
            VersionCheck::Mismatched
        ));
        assert!(matches!(check_version(&untagged, None), VersionCheck::Matched));
        assert!(matches!(
            check_version(&untagged, Some(&json!("a"))),
            VersionCheck::Mismatched
        ));
    }

    #[test]
    fn test_impossible_condition_is_fresh() {
        assert_ne!(impossible_condition(), impossible_condition());
        assert!(impossible_condition().contains_key(ETAG_FIELD));
    }

    #[test]
    fn test_request_builders() {
        let request = WriteRequest::new(
            Namespace::new("db", "c"),
            Method::Put,
            WriteMode::Upsert,
            json!({"a": 1}),
        )
        .with_id("x")
        .with_if_match("tag")
        .with_etag_check(true);

        assert_eq!(request.document_id, Some(json!("x")));
        assert_eq!(request.if_match, Some(json!("tag")));
        assert!(request.check_etag);
    }
}
