//! Bulk writes
//!
//! Batches run unordered, so one failing item does not stop the others.
//! Bulk writes skip the per-document version check; every document a batch
//! writes or patches gets the same new token.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::engine::WriteMode;
use super::errors::{WriteError, WriteResult};
use super::invalidate::CacheInvalidator;
use super::payload::update_document;
use super::result::{BulkOperationResult, StatusHint};
use crate::config::WriteConfig;
use crate::model::{
    and_filters, generate_id, id_filter, Document, Namespace, SessionHandle, VersionToken,
    ETAG_FIELD, ID_FIELD,
};
use crate::observability::EngineMetrics;
use crate::store::{BulkWriteOutcome, DocumentStore, StoreError, WriteModel};

/// Coordinates multi-document writes.
pub struct BulkWriteCoordinator {
    store: Arc<dyn DocumentStore>,
    invalidator: CacheInvalidator,
    config: WriteConfig,
    metrics: Arc<EngineMetrics>,
}

impl BulkWriteCoordinator {
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

    /// Inserts or replaces a batch of documents.
    ///
    /// Entries that are not objects are ignored. Documents without `_id`
    /// get a generated one. The status is `MultiStatus` when any item
    /// failed; the failures are listed in the outcome.
    pub fn bulk_write_documents(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        documents: &[Value],
        filter: Option<&Document>,
        shard_keys: Option<&Document>,
        write_mode: WriteMode,
    ) -> WriteResult<BulkOperationResult> {
        let token = VersionToken::generate();

        let models: Vec<WriteModel> = documents
            .iter()
            .filter_map(Value::as_object)
            .map(|document| {
                let mut document = document.clone();
                let id = document
                    .entry(ID_FIELD.to_string())
                    .or_insert_with(generate_id)
                    .clone();
                document.insert(ETAG_FIELD.to_string(), token.to_value());

                let predicate = and_filters([
                    id_filter(&id),
                    shard_keys.cloned().unwrap_or_default(),
                    filter.cloned().unwrap_or_default(),
                ]);

                match write_mode {
                    WriteMode::Insert => WriteModel::InsertOne { document },
                    WriteMode::Update | WriteMode::Upsert => WriteModel::ReplaceOne {
                        filter: predicate,
                        replacement: document,
                        upsert: write_mode == WriteMode::Upsert,
                    },
                }
            })
            .collect();

        if models.is_empty() {
            return Ok(BulkOperationResult {
                status: StatusHint::Ok,
                etag: Some(token),
                outcome: Some(BulkWriteOutcome::default()),
                cause: None,
            });
        }

        let submitted = models.len();
        let outcome = self.store.bulk_write(session, namespace, models, false)?;

        debug!(
            namespace = %namespace,
            submitted,
            failed = outcome.errors.len(),
            "bulk write executed"
        );

        self.committed(namespace);
        Ok(BulkOperationResult {
            status: if outcome.is_clean() {
                StatusHint::Ok
            } else {
                StatusHint::MultiStatus
            },
            etag: Some(token),
            outcome: Some(outcome),
            cause: None,
        })
    }

    /// Applies one merge document to every document matching `filter`,
    /// stamping each with the same new token.
    pub fn bulk_patch_documents(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        shard_keys: Option<&Document>,
        data: &Value,
    ) -> WriteResult<BulkOperationResult> {
        if filter.is_empty() {
            return Ok(BulkOperationResult::bad_request(WriteError::bad_request(
                "bulk patch requires a filter",
            )));
        }
        let Value::Object(data) = data else {
            return Ok(BulkOperationResult::bad_request(WriteError::bad_request(
                "content must be a JSON object",
            )));
        };

        let token = VersionToken::generate();
        let mut data = data.clone();
        data.insert(ETAG_FIELD.to_string(), token.to_value());

        let model = WriteModel::UpdateMany {
            filter: and_filters([filter.clone(), shard_keys.cloned().unwrap_or_default()]),
            update: update_document(&data, self.config.flatten_patch),
        };

        self.execute_filtered(session, namespace, model, Some(token))
    }

    /// Deletes every document matching `filter`.
    pub fn bulk_delete_documents(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        shard_keys: Option<&Document>,
    ) -> WriteResult<BulkOperationResult> {
        if filter.is_empty() {
            return Ok(BulkOperationResult::bad_request(WriteError::bad_request(
                "bulk delete requires a filter",
            )));
        }

        let model = WriteModel::DeleteMany {
            filter: and_filters([filter.clone(), shard_keys.cloned().unwrap_or_default()]),
        };

        self.execute_filtered(session, namespace, model, None)
    }

    fn execute_filtered(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        model: WriteModel,
        etag: Option<VersionToken>,
    ) -> WriteResult<BulkOperationResult> {
        let mut outcome = self.store.bulk_write(session, namespace, vec![model], true)?;

        if let Some(failed) = outcome.errors.pop() {
            return match failed.error {
                err @ (StoreError::BadValue(_) | StoreError::InvalidUpdate(_)) => {
                    Ok(BulkOperationResult::bad_request(err))
                }
                err => Err(err.into()),
            };
        }

        self.committed(namespace);
        Ok(BulkOperationResult {
            status: StatusHint::Ok,
            etag,
            outcome: Some(outcome),
            cause: None,
        })
    }

    fn committed(&self, namespace: &Namespace) {
        self.invalidator.invalidate_namespace(namespace);
        self.metrics.increment_writes_committed();
    }
}
