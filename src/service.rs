//! Index and document lifecycle.
//!
//! [`IndexService`] is the only writer of indices, documents, and status
//! rows. It coordinates three stores that fail independently, without a
//! transaction spanning them:
//!
//! ```text
//!  create_index:  validate ─▶ bucket_exists? ─▶ create_bucket ─▶ arm hook ─▶ put metadata
//!                                 │ yes              │ err            │ err          │ err
//!                                 ▼                  ▼                └──────┬───────┘
//!                             Conflict           Internal          delete_bucket (best effort)
//!                                                                         ▼
//!                                                              original error returned
//! ```
//!
//! The object store is the authority on existence. Status rows are a
//! best-effort companion: failures writing or deleting them during upload,
//! document delete, or index delete are logged and swallowed.
//!
//! An index exists iff its bucket exists and its `.metadata.json` parses.
//! Buckets without valid metadata are ignored by listings and lookups.
//!
//! The existence check and bucket creation in [`IndexService::create_index`]
//! are not atomic. Two concurrent creations of the same name may both pass
//! the check; the object store's own bucket creation decides the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use rag_indices_core::models::{Document, DocumentStatus, Index, IndexSummary, StatusKind};
use rag_indices_core::naming::{
    check_upload_filename, is_reserved_filename, is_valid_index_name, METADATA_OBJECT,
};
use rag_indices_core::store::{ObjectStore, StatusStore, StoredObject};

use crate::error::{IndexError, IndexResult, InternalContext};
use crate::notify::NotificationBridge;

const INDEX_NOT_FOUND: &str = "RAG index not found";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct IndexService {
    objects: Arc<dyn ObjectStore>,
    statuses: Arc<dyn StatusStore>,
    bridge: NotificationBridge,
}

impl IndexService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        statuses: Arc<dyn StatusStore>,
        bridge: NotificationBridge,
    ) -> Self {
        Self {
            objects,
            statuses,
            bridge,
        }
    }

    // ============ Indices ============

    /// All valid indices, sorted by name.
    pub async fn list_indices(&self) -> IndexResult<Vec<Index>> {
        let buckets = self
            .objects
            .list_buckets()
            .await
            .internal("Failed to list indices")?;

        let mut indices = Vec::new();
        for bucket in buckets {
            match self.read_metadata(&bucket).await {
                Ok(Some(index)) => indices.push(index),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(index = %bucket, error = %e, "skipping bucket with unreadable metadata")
                }
            }
        }
        indices.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(operation = "list", count = indices.len(), "listed RAG indices");
        Ok(indices)
    }

    /// Name and description of every valid index.
    pub async fn list_index_summaries(&self) -> IndexResult<Vec<IndexSummary>> {
        Ok(self
            .list_indices()
            .await?
            .iter()
            .map(IndexSummary::from)
            .collect())
    }

    pub async fn get_index(&self, name: &str) -> IndexResult<Index> {
        self.require_index(name).await
    }

    /// Create an index: bucket, event hook, metadata, with rollback of the
    /// bucket if either later step fails.
    pub async fn create_index(&self, name: &str, description: &str) -> IndexResult<Index> {
        if name.is_empty() {
            return Err(IndexError::bad_request("Index name is required"));
        }
        if !is_valid_index_name(name) {
            return Err(IndexError::bad_request(
                "Index name must be 1-63 lowercase alphanumeric characters or hyphens, \
                 starting and ending with an alphanumeric character",
            ));
        }

        let exists = self
            .objects
            .bucket_exists(name)
            .await
            .internal("Failed to check index")?;
        if exists {
            return Err(IndexError::conflict(format!(
                "RAG index '{}' already exists",
                name
            )));
        }

        self.objects
            .create_bucket(name)
            .await
            .internal("Failed to create index")?;

        if let Err(e) = self.bridge.arm(name).await {
            tracing::error!(index = %name, operation = "create", error = ?e, "failed to set bucket notification");
            self.rollback_bucket(name).await;
            return Err(IndexError::internal(
                "Failed to configure index notifications",
                e,
            ));
        }

        let index = Index::new(name, description);
        if let Err(e) = self.write_metadata(&index).await {
            tracing::error!(index = %name, operation = "create", error = ?e, "failed to store metadata");
            self.rollback_bucket(name).await;
            return Err(IndexError::internal("Failed to create index metadata", e));
        }

        tracing::info!(index = %name, operation = "create", "created RAG index");
        Ok(index)
    }

    /// Replace the description of an existing index.
    pub async fn update_index(&self, name: &str, description: &str) -> IndexResult<Index> {
        let mut index = self.require_index(name).await?;
        index.description = description.to_string();

        self.write_metadata(&index)
            .await
            .internal("Failed to update index")?;

        tracing::info!(index = %name, operation = "update", "updated RAG index");
        Ok(index)
    }

    /// Delete every object and the bucket, then best-effort remove the
    /// index's status rows.
    ///
    /// Existence is decided by the bucket alone so that buckets left without
    /// metadata can still be removed.
    pub async fn delete_index(&self, name: &str) -> IndexResult<()> {
        if !is_valid_index_name(name) {
            return Err(IndexError::not_found(INDEX_NOT_FOUND));
        }
        let exists = self
            .objects
            .bucket_exists(name)
            .await
            .internal("Failed to check index")?;
        if !exists {
            return Err(IndexError::not_found(INDEX_NOT_FOUND));
        }

        self.objects
            .delete_bucket(name)
            .await
            .internal("Failed to delete index")?;

        if let Err(e) = self.statuses.delete_for_index(name).await {
            tracing::error!(index = %name, operation = "delete", error = ?e, "failed to delete document statuses");
        }

        tracing::info!(index = %name, operation = "delete", "deleted RAG index");
        Ok(())
    }

    // ============ Documents ============

    /// Documents of an index, each joined with its status row if one exists.
    pub async fn list_documents(&self, name: &str) -> IndexResult<Vec<Document>> {
        self.require_index(name).await?;

        let objects = self
            .objects
            .list_objects(name)
            .await
            .internal("Failed to list documents")?;

        let statuses: HashMap<String, DocumentStatus> =
            match self.statuses.list_for_index(name).await {
                Ok(rows) => rows.into_iter().map(|s| (s.filename.clone(), s)).collect(),
                Err(e) => {
                    tracing::error!(index = %name, operation = "list-documents", error = ?e, "failed to list document statuses");
                    HashMap::new()
                }
            };

        let documents: Vec<Document> = objects
            .into_iter()
            .filter(|obj| !is_reserved_filename(&obj.key) && !obj.key.ends_with('/'))
            .map(|obj| {
                let status = statuses.get(&obj.key);
                Document {
                    size: obj.size,
                    content_type: obj.content_type,
                    last_modified: obj.last_modified,
                    status: status.map(|s| s.status),
                    error_msg: status.and_then(|s| s.error_msg.clone()),
                    name: obj.key,
                }
            })
            .collect();

        tracing::info!(index = %name, operation = "list-documents", count = documents.len(), "listed documents");
        Ok(documents)
    }

    /// Store a document and record it as `pending`.
    ///
    /// The filename is checked before the index is looked up.
    pub async fn upload_document(
        &self,
        name: &str,
        filename: &str,
        content: Vec<u8>,
        content_type: Option<&str>,
    ) -> IndexResult<Document> {
        check_upload_filename(filename).map_err(IndexError::BadRequest)?;
        self.require_index(name).await?;

        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let size = content.len() as i64;

        self.objects
            .put_object(name, filename, content, &content_type)
            .await
            .internal("Failed to upload file")?;

        let status = DocumentStatus::new(name, filename, StatusKind::Pending, None);
        if let Err(e) = self.statuses.upsert(&status).await {
            tracing::error!(index = %name, filename = %filename, operation = "upload", error = ?e, "failed to store document status");
        }

        tracing::info!(index = %name, filename = %filename, operation = "upload", size, "uploaded document");
        Ok(Document {
            name: filename.to_string(),
            size,
            content_type: Some(content_type),
            last_modified: Utc::now(),
            status: Some(StatusKind::Pending),
            error_msg: None,
        })
    }

    pub async fn download_document(&self, name: &str, filename: &str) -> IndexResult<StoredObject> {
        if is_reserved_filename(filename) {
            return Err(IndexError::bad_request("Cannot download reserved file"));
        }
        self.require_index(name).await?;

        let object = self
            .objects
            .get_object(name, filename)
            .await
            .internal("Failed to get document")?
            .ok_or_else(|| IndexError::not_found("Document not found"))?;

        tracing::info!(index = %name, filename = %filename, operation = "download", "downloaded document");
        Ok(object)
    }

    /// Delete the blob, then best-effort delete its status row.
    pub async fn delete_document(&self, name: &str, filename: &str) -> IndexResult<()> {
        if is_reserved_filename(filename) {
            return Err(IndexError::bad_request("Cannot delete reserved file"));
        }

        self.objects
            .delete_object(name, filename)
            .await
            .internal("Failed to delete document")?;

        if let Err(e) = self.statuses.delete(name, filename).await {
            tracing::error!(index = %name, filename = %filename, operation = "delete-document", error = ?e, "failed to delete document status");
        }

        tracing::info!(index = %name, filename = %filename, operation = "delete-document", "deleted document");
        Ok(())
    }

    // ============ Status ============

    /// Record a status reported by the embedding worker.
    ///
    /// Does not check that the document exists.
    pub async fn update_document_status(
        &self,
        name: &str,
        filename: &str,
        status: &str,
        error_msg: Option<String>,
    ) -> IndexResult<DocumentStatus> {
        if status.trim().is_empty() {
            return Err(IndexError::bad_request("Status is required"));
        }
        let kind: StatusKind = status
            .parse()
            .map_err(|e: anyhow::Error| IndexError::bad_request(e.to_string()))?;
        let error_msg = error_msg.filter(|m| !m.is_empty());

        let record = DocumentStatus::new(name, filename, kind, error_msg);
        self.statuses
            .upsert(&record)
            .await
            .internal("Failed to update document status")?;

        tracing::info!(index = %name, filename = %filename, operation = "update-status", status = %kind, "updated document status");
        Ok(record)
    }

    pub async fn delete_document_status(&self, name: &str, filename: &str) -> IndexResult<()> {
        let removed = self
            .statuses
            .delete(name, filename)
            .await
            .internal("Failed to delete document status")?;

        tracing::info!(index = %name, filename = %filename, operation = "delete-status", removed, "deleted document status");
        Ok(())
    }

    // ============ Helpers ============

    /// Resolve a valid index or fail with `NotFound`.
    async fn require_index(&self, name: &str) -> IndexResult<Index> {
        if !is_valid_index_name(name) {
            return Err(IndexError::not_found(INDEX_NOT_FOUND));
        }
        let exists = self
            .objects
            .bucket_exists(name)
            .await
            .internal("Failed to check index")?;
        if !exists {
            return Err(IndexError::not_found(INDEX_NOT_FOUND));
        }

        match self.read_metadata(name).await {
            Ok(Some(index)) => Ok(index),
            Ok(None) => Err(IndexError::not_found(INDEX_NOT_FOUND)),
            Err(e) => {
                tracing::warn!(index = %name, error = %e, "failed to read index metadata");
                Err(IndexError::not_found(INDEX_NOT_FOUND))
            }
        }
    }

    /// Read and parse the metadata object. `Ok(None)` when it is missing or
    /// does not parse.
    async fn read_metadata(&self, bucket: &str) -> anyhow::Result<Option<Index>> {
        let Some(object) = self.objects.get_object(bucket, METADATA_OBJECT).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Index>(&object.data) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                tracing::debug!(index = %bucket, error = %e, "ignoring unparsable metadata");
                Ok(None)
            }
        }
    }

    async fn write_metadata(&self, index: &Index) -> anyhow::Result<()> {
        let data = serde_json::to_vec(index)?;
        self.objects
            .put_object(&index.name, METADATA_OBJECT, data, "application/json")
            .await
    }

    async fn rollback_bucket(&self, name: &str) {
        if let Err(e) = self.objects.delete_bucket(name).await {
            tracing::error!(index = %name, operation = "create", error = ?e, "rollback of bucket creation failed");
        }
    }
}
